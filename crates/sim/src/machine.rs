use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use pf_core::{
    AnomalyKind, CoreError, DefectType, EventType, MachineConfig, MachineEvent, MachineState,
    MachineType, QualityEvent, QualityResult, SensorMetric, SensorProfile, SimulationConfig,
};

use crate::anomaly::{AnomalyInjector, AnomalyPhase, AnomalyRecord};
use crate::sensors::nominal_reading;
use crate::state_machine::{MachineStateMachine, StateChange, TransitionReason};
use crate::wear::WearModel;
use crate::MachineRng;

/// Everything one machine emitted for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub events: Vec<MachineEvent>,
    pub sensor: SensorMetric,
    pub quality: Option<QualityEvent>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MachineSnapshot {
    pub machine_id: String,
    pub machine_type: MachineType,
    pub state: MachineState,
    pub total_cycles: u64,
    pub good_parts: u64,
    pub bad_parts: u64,
    /// Percentage of inspected parts that passed; 100 before any inspection.
    pub quality_rate: f64,
    pub wear_factor: f64,
    pub operating_hours: f64,
    pub uptime_ratio: f64,
    pub target_uptime: f64,
    pub active_anomaly: Option<AnomalyKind>,
    pub anomalies_injected: u64,
    pub rejected_transitions: u64,
}

/// Derives a per-machine seed from the fleet seed and the machine id, so a
/// machine's random sequence does not depend on its position in the fleet.
pub fn machine_seed(seed: u64, machine_id: &str) -> u64 {
    xxh64(machine_id.as_bytes(), seed)
}

/// One simulated machine: state machine, wear and anomaly injection driven by
/// a private random source.
#[derive(Debug, Clone)]
pub struct MachineSimulator {
    config: MachineConfig,
    profile: SensorProfile,
    failure_rate_scale: f64,
    state_machine: MachineStateMachine,
    wear: WearModel,
    anomaly: AnomalyInjector,
    rng: MachineRng,
    cycle_progress_secs: f64,
    state_secs: [f64; 8],
    rejected_transitions: u64,
}

impl MachineSimulator {
    pub fn new(config: MachineConfig, settings: &SimulationConfig) -> Result<Self, CoreError> {
        let rng = MachineRng::seed_from_u64(machine_seed(settings.seed, &config.machine_id));
        Self::with_rng(config, settings, rng)
    }

    pub fn with_rng(
        config: MachineConfig,
        settings: &SimulationConfig,
        rng: MachineRng,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        settings.validate()?;
        let anomaly = AnomalyInjector::new(
            config.machine_id.clone(),
            settings.anomaly_injection_enabled,
            config.anomaly_injection_probability,
            settings.anomaly_duration,
        );
        Ok(Self {
            profile: config.machine_type.profile(),
            failure_rate_scale: settings.failure_rate_scale,
            state_machine: MachineStateMachine::new(settings.state_timings.clone()),
            wear: WearModel::new(settings.wear.clone()),
            anomaly,
            rng,
            cycle_progress_secs: 0.0,
            state_secs: [0.0; 8],
            rejected_transitions: 0,
            config,
        })
    }

    /// Replaces the initial IDLE phase, mainly for driving a machine from a
    /// known state in tests and replays.
    pub fn starting_in(mut self, state: MachineState, planned_secs: f64) -> Self {
        let timings = self.state_machine.timings().clone();
        self.state_machine = MachineStateMachine::starting_in(timings, state, planned_secs);
        self
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn machine_id(&self) -> &str {
        &self.config.machine_id
    }

    pub fn state(&self) -> MachineState {
        self.state_machine.state()
    }

    pub fn state_machine(&self) -> &MachineStateMachine {
        &self.state_machine
    }

    pub fn wear(&self) -> &WearModel {
        &self.wear
    }

    pub fn anomaly(&self) -> &AnomalyInjector {
        &self.anomaly
    }

    pub fn rejected_transitions(&self) -> u64 {
        self.rejected_transitions
    }

    /// Advances this machine by `delta_secs` of simulated time ending at `now_ms`.
    pub fn update(&mut self, now_ms: u64, delta_secs: f64) -> TickOutput {
        let delta_secs = delta_secs.max(0.0);
        let mut events = Vec::new();

        if let Some(record) = self.anomaly.step(delta_secs, now_ms, &mut self.rng) {
            events.push(self.anomaly_event(&record));
        }

        let prev = self.state_machine.state();
        self.state_secs[prev.index()] += delta_secs;
        self.wear.accumulate(delta_secs, prev);

        // A sampled failure pre-empts the dwell timer for this tick.
        let failed = prev == MachineState::Running && self.sample_failure(delta_secs);
        let forced = if failed {
            self.force(MachineState::UnplannedDowntime, TransitionReason::DetectedFailure, now_ms)
        } else {
            None
        };
        let mut change = match forced {
            Some(change) => Some(change),
            None => self.state_machine.advance(delta_secs, now_ms, &mut self.rng),
        };
        if change.is_none()
            && self.state_machine.state() == MachineState::Running
            && self.wear.needs_maintenance()
        {
            change = self.force(
                MachineState::Maintenance,
                TransitionReason::PreventiveMaintenance,
                now_ms,
            );
        }
        if let Some(change) = change {
            self.on_state_change(&change);
            events.push(self.status_event(&change));
        }

        let completed = if prev == MachineState::Running {
            self.complete_cycles(delta_secs)
        } else {
            0
        };

        let sensor = self.synthesize(now_ms);

        for _ in 0..completed {
            let count = self.wear.record_cycle();
            events.push(self.cycle_event(now_ms, count));
        }
        let quality = if completed > 0 && self.rng.gen_bool(self.config.quality_inspection_probability)
        {
            Some(self.inspect(now_ms))
        } else {
            None
        };

        TickOutput { events, sensor, quality }
    }

    /// Externally triggered transition. A rejected target only bumps the
    /// rejection counter; the machine state is untouched.
    pub fn force_transition(
        &mut self,
        target: MachineState,
        reason: TransitionReason,
        now_ms: u64,
    ) -> Result<MachineEvent, CoreError> {
        let change = match self
            .state_machine
            .force_transition(target, reason, now_ms, &mut self.rng)
        {
            Ok(change) => change,
            Err(err) => {
                self.rejected_transitions += 1;
                return Err(err);
            }
        };
        self.on_state_change(&change);
        Ok(self.status_event(&change))
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let wear = self.wear.state();
        let inspected = wear.quality_pass_count + wear.quality_fail_count;
        let quality_rate = if inspected == 0 {
            100.0
        } else {
            wear.quality_pass_count as f64 * 100.0 / inspected as f64
        };
        let total: f64 = self.state_secs.iter().sum();
        let uptime_ratio = if total > 0.0 {
            self.state_secs[MachineState::Running.index()] / total
        } else {
            0.0
        };
        MachineSnapshot {
            machine_id: self.config.machine_id.clone(),
            machine_type: self.config.machine_type,
            state: self.state(),
            total_cycles: wear.cycles_completed,
            good_parts: wear.quality_pass_count,
            bad_parts: wear.quality_fail_count,
            quality_rate,
            wear_factor: wear.wear_factor,
            operating_hours: wear.operating_hours,
            uptime_ratio,
            target_uptime: self.config.reliability.base_uptime,
            active_anomaly: self.anomaly.active_kind(),
            anomalies_injected: self.anomaly.injected_count(),
            rejected_transitions: self.rejected_transitions,
        }
    }

    fn force(
        &mut self,
        target: MachineState,
        reason: TransitionReason,
        now_ms: u64,
    ) -> Option<StateChange> {
        match self
            .state_machine
            .force_transition(target, reason, now_ms, &mut self.rng)
        {
            Ok(change) => Some(change),
            Err(err) => {
                self.rejected_transitions += 1;
                warn!(machine_id = %self.config.machine_id, error = %err, "forced transition rejected");
                None
            }
        }
    }

    fn on_state_change(&mut self, change: &StateChange) {
        if change.from == MachineState::Maintenance {
            self.wear.on_maintenance_complete(change.at_ms);
        }
        debug!(
            machine_id = %self.config.machine_id,
            from = %change.from,
            to = %change.to,
            reason = %change.reason,
            "state change"
        );
    }

    /// Bernoulli draw against the MTBF hazard over `delta_secs`, raised by wear.
    fn sample_failure(&mut self, delta_secs: f64) -> bool {
        if delta_secs <= 0.0 || self.failure_rate_scale <= 0.0 {
            return false;
        }
        let hours = delta_secs / 3_600.0;
        let hazard = 1.0 - (-hours / self.config.reliability.mtbf_hours).exp();
        let p = (self.failure_rate_scale * hazard * (1.0 + 3.0 * self.wear.wear_factor()))
            .clamp(0.0, 1.0);
        p > 0.0 && self.rng.gen_bool(p)
    }

    fn complete_cycles(&mut self, delta_secs: f64) -> u64 {
        if delta_secs <= 0.0 {
            return 0;
        }
        self.cycle_progress_secs += delta_secs;
        let mut completed = 0;
        while self.cycle_progress_secs >= self.config.cycle_duration_secs {
            self.cycle_progress_secs -= self.config.cycle_duration_secs;
            completed += 1;
        }
        completed
    }

    fn synthesize(&mut self, now_ms: u64) -> SensorMetric {
        let mut reading = nominal_reading(
            self.state_machine.state(),
            self.state_machine.progress_fraction(),
            &self.profile,
            f64::from(self.config.nominal_rpm),
            &mut self.rng,
        );
        let wear = &self.wear;
        let anomaly = &self.anomaly;
        reading.map_channels(|kind, value| anomaly.apply(kind, value * wear.sensor_bias(kind)));

        SensorMetric {
            machine_id: self.config.machine_id.clone(),
            ts_ms: now_ms,
            temperature: reading.temperature,
            vibration: reading.vibration,
            speed_rpm: reading.speed_rpm,
            pressure: reading.pressure,
            power_kw: reading.power_kw,
            operating_hours: self.wear.state().operating_hours,
            anomaly: self.anomaly.active_kind(),
        }
    }

    fn inspect(&mut self, now_ms: u64) -> QualityEvent {
        let boost = if self.anomaly.active().is_some() {
            self.wear.params().anomaly_defect_boost
        } else {
            0.0
        };
        let p_defect = (self.wear.defect_probability() + boost).clamp(0.0, 1.0);
        let defective = self.rng.gen_bool(p_defect);
        self.wear.record_inspection(!defective);

        let (result, defect_type, severity) = if defective {
            let defect = DefectType::ALL.choose(&mut self.rng).copied();
            (QualityResult::Nok, defect, Some(self.rng.gen_range(1..=5u8)))
        } else {
            (QualityResult::Ok, None, None)
        };
        QualityEvent {
            machine_id: self.config.machine_id.clone(),
            ts_ms: now_ms,
            cycle_count: self.wear.state().cycles_completed,
            result,
            defect_type,
            severity,
            inspector_id: format!("inspector_{}", self.rng.gen_range(1..=5u8)),
            batch_id: format!("batch_{}", now_ms / 3_600_000),
        }
    }

    fn base_event(&self, ts_ms: u64, event_type: EventType, reason: String) -> MachineEvent {
        MachineEvent {
            machine_id: self.config.machine_id.clone(),
            ts_ms,
            event_type,
            from_state: None,
            to_state: None,
            reason,
            cycle_count: Some(self.wear.state().cycles_completed),
            shift: self.config.shift.clone(),
            operator_id: self.config.operator_id.clone(),
            anomaly: None,
            anomaly_duration_secs: None,
        }
    }

    fn status_event(&self, change: &StateChange) -> MachineEvent {
        MachineEvent {
            from_state: Some(change.from),
            to_state: Some(change.to),
            ..self.base_event(change.at_ms, EventType::StatusChange, change.reason.to_string())
        }
    }

    fn cycle_event(&self, ts_ms: u64, count: u64) -> MachineEvent {
        MachineEvent {
            cycle_count: Some(count),
            ..self.base_event(ts_ms, EventType::CycleComplete, format!("Cycle {count} completed"))
        }
    }

    fn anomaly_event(&self, record: &AnomalyRecord) -> MachineEvent {
        let (event_type, reason) = match record.phase {
            AnomalyPhase::Injected => (
                EventType::AnomalyInjected,
                format!("{} injected for {:.0}s", record.kind, record.duration_secs),
            ),
            AnomalyPhase::Ended => (EventType::AnomalyEnded, format!("{} ended", record.kind)),
        };
        MachineEvent {
            anomaly: Some(record.kind),
            anomaly_duration_secs: Some(record.duration_secs),
            ..self.base_event(record.at_ms, event_type, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::{DurationRange, MachineType};

    fn quiet_settings() -> SimulationConfig {
        SimulationConfig {
            anomaly_injection_enabled: false,
            failure_rate_scale: 0.0,
            ..Default::default()
        }
    }

    fn mill() -> MachineConfig {
        MachineConfig {
            anomaly_injection_probability: 0.0,
            ..MachineConfig::new("TEST_001", MachineType::CncMill, 3000, 10.0)
        }
    }

    #[test]
    fn starts_idle_and_emits_one_metric_per_tick() {
        let mut sim = MachineSimulator::new(mill(), &quiet_settings()).unwrap();
        assert_eq!(sim.state(), MachineState::Idle);

        let out = sim.update(1_000, 0.0);
        assert_eq!(out.sensor.machine_id, "TEST_001");
        assert_eq!(out.sensor.speed_rpm, 0.0);
        assert!(out.sensor.vibration < 1.0);
        assert!(out.events.is_empty());
        assert!(out.quality.is_none());
    }

    #[test]
    fn first_positive_tick_starts_the_shift() {
        let mut sim = MachineSimulator::new(mill(), &quiet_settings()).unwrap();
        let out = sim.update(5_000, 5.0);
        let ev = &out.events[0];
        assert_eq!(ev.event_type, EventType::StatusChange);
        assert_eq!(ev.from_state, Some(MachineState::Idle));
        assert_eq!(ev.to_state, Some(MachineState::Warmup));
        assert_eq!(ev.reason, "Starting production shift");
        assert_eq!(ev.shift, "day");
    }

    #[test]
    fn operating_hours_accumulate_only_while_running() {
        let sim = MachineSimulator::new(mill(), &quiet_settings()).unwrap();
        let mut sim = sim.starting_in(MachineState::Running, 10_000.0);
        for i in 0..720u64 {
            sim.update(i * 5_000, 5.0);
        }
        let hours = sim.wear().state().operating_hours;
        assert!((hours - 1.0).abs() < 0.01, "{hours}");
        assert!(sim.wear().wear_factor() > 0.0);
    }

    #[test]
    fn rejected_force_keeps_state_and_is_counted() {
        let mut sim = MachineSimulator::new(mill(), &quiet_settings()).unwrap();
        let err = sim
            .force_transition(MachineState::Maintenance, TransitionReason::Other, 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(sim.state(), MachineState::Idle);
        assert_eq!(sim.rejected_transitions(), 1);
        assert_eq!(sim.snapshot().rejected_transitions, 1);

        sim.force_transition(MachineState::Warmup, TransitionReason::ShiftStart, 0)
            .unwrap();
        assert_eq!(sim.rejected_transitions(), 1);
    }

    #[test]
    fn maintenance_exit_resets_wear() {
        let mut settings = quiet_settings();
        settings.state_timings.maintenance = DurationRange::new(10.0, 10.0);
        let mut sim = MachineSimulator::new(mill(), &settings)
            .unwrap()
            .starting_in(MachineState::Running, 10_000.0);
        sim.wear = WearModel::with_wear(settings.wear.clone(), 0.6);

        sim.force_transition(MachineState::Maintenance, TransitionReason::PreventiveMaintenance, 0)
            .unwrap();
        assert_eq!(sim.wear().wear_factor(), 0.6);
        let out = sim.update(10_000, 10.0);
        assert_eq!(out.events[0].reason, "Maintenance completed");
        assert!(sim.wear().wear_factor() < 0.6 && sim.wear().wear_factor() > 0.0);
        assert_eq!(sim.wear().state().last_maintenance_ms, Some(10_000));
    }

    #[test]
    fn worn_running_machine_is_pulled_into_maintenance() {
        let settings = quiet_settings();
        let mut sim = MachineSimulator::new(mill(), &settings)
            .unwrap()
            .starting_in(MachineState::Running, 10_000.0);
        sim.wear = WearModel::with_wear(settings.wear.clone(), 0.97);
        let out = sim.update(1_000, 1.0);
        assert_eq!(sim.state(), MachineState::Maintenance);
        assert!(out
            .events
            .iter()
            .any(|e| e.reason == "Preventive maintenance"));
    }

    #[test]
    fn certain_failure_preempts_the_timer() {
        let settings = SimulationConfig { failure_rate_scale: 1.0, ..quiet_settings() };
        let mut cfg = mill();
        cfg.reliability.mtbf_hours = 1e-9;
        let mut sim = MachineSimulator::new(cfg, &settings)
            .unwrap()
            .starting_in(MachineState::Running, 0.5);
        let out = sim.update(1_000, 1.0);
        assert_eq!(sim.state(), MachineState::UnplannedDowntime);
        let status: Vec<_> = out
            .events
            .iter()
            .filter(|e| e.event_type == EventType::StatusChange)
            .collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].reason, "Unexpected failure");
    }

    #[test]
    fn defects_rise_with_wear() {
        let mut cfg = mill();
        cfg.quality_inspection_probability = 1.0;
        cfg.cycle_duration_secs = 1.0;
        let settings = quiet_settings();

        let count_defects = |wear: f64| {
            let mut sim = MachineSimulator::new(cfg.clone(), &settings)
                .unwrap()
                .starting_in(MachineState::Running, 1e9);
            let mut params = settings.wear.clone();
            params.maintenance_threshold = 1.0;
            sim.wear = WearModel::with_wear(params, wear);
            (0..4_000u64)
                .filter_map(|i| sim.update(i * 1_000, 1.0).quality)
                .filter(|q| q.result == QualityResult::Nok)
                .count()
        };
        assert!(count_defects(0.9) > count_defects(0.0));
    }

    #[test]
    fn snapshot_reports_quality_rate() {
        let mut sim = MachineSimulator::new(mill(), &quiet_settings()).unwrap();
        assert_eq!(sim.snapshot().quality_rate, 100.0);
        for passed in [true, true, true, true, true, true, true, true, true, false] {
            sim.wear.record_inspection(passed);
        }
        let snap = sim.snapshot();
        assert_eq!(snap.quality_rate, 90.0);
        assert_eq!(snap.bad_parts, 1);
    }

    #[test]
    fn seed_depends_on_id_not_position() {
        assert_eq!(machine_seed(42, "machine_001"), machine_seed(42, "machine_001"));
        assert_ne!(machine_seed(42, "machine_001"), machine_seed(42, "machine_002"));
        assert_ne!(machine_seed(42, "machine_001"), machine_seed(43, "machine_001"));
        assert_eq!(machine_seed(42, "machine_001"), xxh64(b"machine_001", 42));
    }
}
