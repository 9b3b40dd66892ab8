use std::fmt;

use serde::{Deserialize, Serialize};

pub type MachineId = String;

/// Operational phase of a single machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Idle,
    Warmup,
    Running,
    Setup,
    PlannedDowntime,
    UnplannedDowntime,
    Maintenance,
    Cooldown,
}

impl MachineState {
    pub const ALL: [MachineState; 8] = [
        MachineState::Idle,
        MachineState::Warmup,
        MachineState::Running,
        MachineState::Setup,
        MachineState::PlannedDowntime,
        MachineState::UnplannedDowntime,
        MachineState::Maintenance,
        MachineState::Cooldown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Idle => "idle",
            MachineState::Warmup => "warmup",
            MachineState::Running => "running",
            MachineState::Setup => "setup",
            MachineState::PlannedDowntime => "planned_downtime",
            MachineState::UnplannedDowntime => "unplanned_downtime",
            MachineState::Maintenance => "maintenance",
            MachineState::Cooldown => "cooldown",
        }
    }

    /// Dense index into per-state tables.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    CncMill,
    CncLathe,
    InjectionMold,
    Press,
    AssemblyRobot,
}

/// Nominal operating envelope of a machine type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorProfile {
    pub base_temperature: f64,
    pub base_vibration: f64,
    pub base_pressure: f64,
    pub running_power_kw: f64,
}

impl MachineType {
    pub fn profile(&self) -> SensorProfile {
        match self {
            MachineType::CncMill => SensorProfile {
                base_temperature: 45.0,
                base_vibration: 2.5,
                base_pressure: 6.0,
                running_power_kw: 15.0,
            },
            MachineType::CncLathe => SensorProfile {
                base_temperature: 42.0,
                base_vibration: 2.2,
                base_pressure: 5.5,
                running_power_kw: 12.0,
            },
            MachineType::InjectionMold => SensorProfile {
                base_temperature: 60.0,
                base_vibration: 1.5,
                base_pressure: 7.5,
                running_power_kw: 22.0,
            },
            MachineType::Press => SensorProfile {
                base_temperature: 40.0,
                base_vibration: 3.5,
                base_pressure: 7.0,
                running_power_kw: 18.0,
            },
            MachineType::AssemblyRobot => SensorProfile {
                base_temperature: 38.0,
                base_vibration: 1.2,
                base_pressure: 4.5,
                running_power_kw: 8.0,
            },
        }
    }
}

/// Sensor channel carried by every [`SensorMetric`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Vibration,
    Speed,
    Pressure,
    Power,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Temperature,
        SensorKind::Vibration,
        SensorKind::Speed,
        SensorKind::Pressure,
        SensorKind::Power,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    TemperatureSpike,
    VibrationAnomaly,
    PressureDrop,
    SpeedFluctuation,
    PowerSurge,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 5] = [
        AnomalyKind::TemperatureSpike,
        AnomalyKind::VibrationAnomaly,
        AnomalyKind::PressureDrop,
        AnomalyKind::SpeedFluctuation,
        AnomalyKind::PowerSurge,
    ];

    /// The only channel this anomaly overrides.
    pub fn channel(&self) -> SensorKind {
        match self {
            AnomalyKind::TemperatureSpike => SensorKind::Temperature,
            AnomalyKind::VibrationAnomaly => SensorKind::Vibration,
            AnomalyKind::PressureDrop => SensorKind::Pressure,
            AnomalyKind::SpeedFluctuation => SensorKind::Speed,
            AnomalyKind::PowerSurge => SensorKind::Power,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::TemperatureSpike => "temperature_spike",
            AnomalyKind::VibrationAnomaly => "vibration_anomaly",
            AnomalyKind::PressureDrop => "pressure_drop",
            AnomalyKind::SpeedFluctuation => "speed_fluctuation",
            AnomalyKind::PowerSurge => "power_surge",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DefectType {
    Dimensional,
    Surface,
    Material,
    Assembly,
}

impl DefectType {
    pub const ALL: [DefectType; 4] = [
        DefectType::Dimensional,
        DefectType::Surface,
        DefectType::Material,
        DefectType::Assembly,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityResult {
    Ok,
    Nok,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StatusChange,
    CycleComplete,
    AnomalyInjected,
    AnomalyEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineEvent {
    pub machine_id: MachineId,
    pub ts_ms: u64,
    pub event_type: EventType,
    pub from_state: Option<MachineState>,
    pub to_state: Option<MachineState>,
    pub reason: String,
    pub cycle_count: Option<u64>,
    pub shift: String,
    pub operator_id: String,
    /// Set on anomaly records only.
    pub anomaly: Option<AnomalyKind>,
    pub anomaly_duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorMetric {
    pub machine_id: MachineId,
    pub ts_ms: u64,
    pub temperature: f64,
    pub vibration: f64,
    pub speed_rpm: f64,
    pub pressure: f64,
    pub power_kw: f64,
    pub operating_hours: f64,
    /// Ground-truth label: the anomaly overriding this reading, if any.
    pub anomaly: Option<AnomalyKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityEvent {
    pub machine_id: MachineId,
    pub ts_ms: u64,
    pub cycle_count: u64,
    pub result: QualityResult,
    pub defect_type: Option<DefectType>,
    pub severity: Option<u8>,
    pub inspector_id: String,
    pub batch_id: String,
}

/// Output stream a record is published to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    MachineEvents,
    SensorMetrics,
    QualityEvents,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::MachineEvents => "machine_events",
            Stream::SensorMetrics => "sensor_metrics",
            Stream::QualityEvents => "quality_events",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PlantRecord {
    Machine(MachineEvent),
    Sensor(SensorMetric),
    Quality(QualityEvent),
}

impl PlantRecord {
    pub fn stream(&self) -> Stream {
        match self {
            PlantRecord::Machine(_) => Stream::MachineEvents,
            PlantRecord::Sensor(_) => Stream::SensorMetrics,
            PlantRecord::Quality(_) => Stream::QualityEvents,
        }
    }

    pub fn machine_id(&self) -> &str {
        match self {
            PlantRecord::Machine(ev) => &ev.machine_id,
            PlantRecord::Sensor(m) => &m.machine_id,
            PlantRecord::Quality(q) => &q.machine_id,
        }
    }
}
