//! Immutable configuration consumed by the simulator at construction time.
//!
//! Everything here is plain data with `Default` values matching the reference
//! plant. Validation happens once, up front; nothing downstream re-checks it.

use serde::{Deserialize, Serialize};

use crate::manufacturing::{MachineState, MachineType};
use crate::CoreError;

/// Closed interval of simulated seconds, sampled uniformly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DurationRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DurationRange {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn validate(&self, what: &str) -> Result<(), CoreError> {
        if !self.min_secs.is_finite() || !self.max_secs.is_finite() || self.min_secs < 0.0 {
            return Err(CoreError::Configuration(format!(
                "{what}: duration bounds must be finite and non-negative"
            )));
        }
        if self.min_secs > self.max_secs {
            return Err(CoreError::SamplingDegeneracy {
                what: what.to_string(),
                min: self.min_secs,
                max: self.max_secs,
            });
        }
        Ok(())
    }

    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.min_secs && secs <= self.max_secs
    }
}

/// Dwell-time range for each machine state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateTimings {
    pub idle: DurationRange,
    pub warmup: DurationRange,
    pub running: DurationRange,
    pub setup: DurationRange,
    pub planned_downtime: DurationRange,
    pub unplanned_downtime: DurationRange,
    pub maintenance: DurationRange,
    pub cooldown: DurationRange,
}

impl Default for StateTimings {
    fn default() -> Self {
        Self {
            idle: DurationRange::new(5.0, 15.0),
            warmup: DurationRange::new(10.0, 20.0),
            running: DurationRange::new(30.0, 120.0),
            setup: DurationRange::new(15.0, 30.0),
            planned_downtime: DurationRange::new(20.0, 40.0),
            unplanned_downtime: DurationRange::new(25.0, 60.0),
            maintenance: DurationRange::new(40.0, 80.0),
            cooldown: DurationRange::new(10.0, 20.0),
        }
    }
}

impl StateTimings {
    pub fn get(&self, state: MachineState) -> DurationRange {
        match state {
            MachineState::Idle => self.idle,
            MachineState::Warmup => self.warmup,
            MachineState::Running => self.running,
            MachineState::Setup => self.setup,
            MachineState::PlannedDowntime => self.planned_downtime,
            MachineState::UnplannedDowntime => self.unplanned_downtime,
            MachineState::Maintenance => self.maintenance,
            MachineState::Cooldown => self.cooldown,
        }
    }

    pub fn set(&mut self, state: MachineState, range: DurationRange) {
        let slot = match state {
            MachineState::Idle => &mut self.idle,
            MachineState::Warmup => &mut self.warmup,
            MachineState::Running => &mut self.running,
            MachineState::Setup => &mut self.setup,
            MachineState::PlannedDowntime => &mut self.planned_downtime,
            MachineState::UnplannedDowntime => &mut self.unplanned_downtime,
            MachineState::Maintenance => &mut self.maintenance,
            MachineState::Cooldown => &mut self.cooldown,
        };
        *slot = range;
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for state in MachineState::ALL {
            self.get(state).validate(&format!("{state} duration"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReliabilityParams {
    /// Mean time between failures, in operating hours.
    pub mtbf_hours: f64,
    /// Mean time to repair, in hours.
    pub mttr_hours: f64,
    /// Target fraction of time spent producing.
    pub base_uptime: f64,
}

impl Default for ReliabilityParams {
    fn default() -> Self {
        Self {
            mtbf_hours: 2.0,
            mttr_hours: 0.25,
            base_uptime: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub machine_id: String,
    pub machine_type: MachineType,
    pub nominal_rpm: u32,
    pub cycle_duration_secs: f64,
    #[serde(default = "default_operator")]
    pub operator_id: String,
    #[serde(default = "default_shift")]
    pub shift: String,
    /// Per-tick Bernoulli probability of starting an anomaly window.
    #[serde(default = "default_anomaly_probability")]
    pub anomaly_injection_probability: f64,
    #[serde(default = "default_inspection_probability")]
    pub quality_inspection_probability: f64,
    #[serde(default)]
    pub reliability: ReliabilityParams,
}

fn default_operator() -> String {
    "operator_unassigned".to_string()
}

fn default_shift() -> String {
    "day".to_string()
}

fn default_anomaly_probability() -> f64 {
    0.05
}

fn default_inspection_probability() -> f64 {
    0.15
}

impl MachineConfig {
    pub fn new(
        machine_id: impl Into<String>,
        machine_type: MachineType,
        nominal_rpm: u32,
        cycle_duration_secs: f64,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            machine_type,
            nominal_rpm,
            cycle_duration_secs,
            operator_id: default_operator(),
            shift: default_shift(),
            anomaly_injection_probability: default_anomaly_probability(),
            quality_inspection_probability: default_inspection_probability(),
            reliability: ReliabilityParams::default(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let id = &self.machine_id;
        if id.trim().is_empty() {
            return Err(CoreError::Configuration("machine id must not be empty".into()));
        }
        if self.nominal_rpm == 0 {
            return Err(CoreError::Configuration(format!("{id}: nominal rpm must be positive")));
        }
        if !(self.cycle_duration_secs.is_finite() && self.cycle_duration_secs > 0.0) {
            return Err(CoreError::Configuration(format!(
                "{id}: cycle duration must be positive, got {}",
                self.cycle_duration_secs
            )));
        }
        check_probability(id, "anomaly injection probability", self.anomaly_injection_probability)?;
        check_probability(id, "quality inspection probability", self.quality_inspection_probability)?;
        let rel = &self.reliability;
        if !(rel.mtbf_hours.is_finite() && rel.mtbf_hours > 0.0) {
            return Err(CoreError::Configuration(format!("{id}: mtbf must be positive")));
        }
        if !(rel.mttr_hours.is_finite() && rel.mttr_hours > 0.0) {
            return Err(CoreError::Configuration(format!("{id}: mttr must be positive")));
        }
        if !(rel.base_uptime > 0.0 && rel.base_uptime <= 1.0) {
            return Err(CoreError::Configuration(format!(
                "{id}: base uptime must be in (0, 1], got {}",
                rel.base_uptime
            )));
        }
        Ok(())
    }
}

fn check_probability(id: &str, what: &str, p: f64) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(CoreError::Configuration(format!("{id}: {what} must be in [0, 1], got {p}")))
    }
}

/// Coefficients of the wear model and the quality/sensor couplings derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WearParams {
    /// Operating hours after which an uncompounded machine reaches full wear.
    pub maintenance_interval_hours: f64,
    /// How strongly existing wear accelerates further wear.
    pub compounding: f64,
    /// Wear left behind by maintenance.
    pub residual_floor: f64,
    /// Wear at which a running machine is pulled into maintenance.
    pub maintenance_threshold: f64,
    pub base_defect_probability: f64,
    pub defect_wear_gain: f64,
    pub anomaly_defect_boost: f64,
    pub temperature_gain: f64,
    pub vibration_gain: f64,
}

impl Default for WearParams {
    fn default() -> Self {
        Self {
            maintenance_interval_hours: 168.0,
            compounding: 1.0,
            residual_floor: 0.02,
            maintenance_threshold: 0.95,
            base_defect_probability: 0.05,
            defect_wear_gain: 0.15,
            anomaly_defect_boost: 0.10,
            temperature_gain: 0.2,
            vibration_gain: 0.5,
        }
    }
}

impl WearParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.maintenance_interval_hours.is_finite() && self.maintenance_interval_hours > 0.0) {
            return Err(CoreError::Configuration(
                "maintenance interval must be positive".into(),
            ));
        }
        if self.compounding < 0.0 || self.temperature_gain < 0.0 || self.vibration_gain < 0.0 {
            return Err(CoreError::Configuration("wear gains must be non-negative".into()));
        }
        if self.defect_wear_gain < 0.0 || self.anomaly_defect_boost < 0.0 {
            return Err(CoreError::Configuration("defect gains must be non-negative".into()));
        }
        if !(self.residual_floor > 0.0 && self.residual_floor < 1.0) {
            return Err(CoreError::Configuration("residual wear floor must be in (0, 1)".into()));
        }
        check_probability("wear", "base defect probability", self.base_defect_probability)?;
        check_probability("wear", "maintenance threshold", self.maintenance_threshold)?;
        Ok(())
    }
}

/// Fleet-wide settings shared by every machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wall-clock seconds between ticks at speed 1.0.
    pub tick_interval_secs: f64,
    /// Simulated seconds represented by one wall-clock second.
    pub time_multiplier: f64,
    /// Compression applied to the sleep between ticks.
    pub simulation_speed: f64,
    pub anomaly_injection_enabled: bool,
    pub seed: u64,
    /// Simulated epoch of the first tick; wall-clock now when absent.
    pub start_epoch_ms: Option<u64>,
    /// Calibration multiplier on the MTBF-derived per-tick failure hazard.
    pub failure_rate_scale: f64,
    pub anomaly_duration: DurationRange,
    pub state_timings: StateTimings,
    pub wear: WearParams,
    /// Threads used to update machines within a tick.
    pub workers: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5.0,
            time_multiplier: 1.0,
            simulation_speed: 1.0,
            anomaly_injection_enabled: true,
            seed: 42,
            start_epoch_ms: None,
            failure_rate_scale: 1.0,
            anomaly_duration: DurationRange::new(30.0, 180.0),
            state_timings: StateTimings::default(),
            wear: WearParams::default(),
            workers: 1,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        for (what, value) in [
            ("tick interval", self.tick_interval_secs),
            ("time multiplier", self.time_multiplier),
            ("simulation speed", self.simulation_speed),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::Configuration(format!(
                    "{what} must be strictly positive, got {value}"
                )));
            }
        }
        if !(self.failure_rate_scale.is_finite() && self.failure_rate_scale >= 0.0) {
            return Err(CoreError::Configuration(
                "failure rate scale must be non-negative".into(),
            ));
        }
        if self.workers == 0 {
            return Err(CoreError::Configuration("workers must be at least 1".into()));
        }
        self.anomaly_duration.validate("anomaly duration")?;
        self.state_timings.validate()?;
        self.wear.validate()
    }
}
