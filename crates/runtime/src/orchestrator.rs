use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use pf_core::{
    CoreError, Epoch, EventEnvelope, MachineConfig, MachineEvent, MachineState, PlantRecord,
    QualityEvent, SensorMetric, SimulationConfig,
};
use pf_sim::{ClockTick, MachineSimulator, SimClock, TickOutput, TransitionReason};

use crate::config::FleetConfig;
use crate::metrics::{EpochTimer, MetricsRegistry};
use crate::sink::{EventSink, PublishOutcome};
use crate::stats::FleetStatistics;

/// Ticks between periodic fleet status logs.
const STATUS_LOG_EVERY: u64 = 60;

/// Output of one orchestrator tick, each stream in machine-config order.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    pub tick: ClockTick,
    pub machine_events: Vec<MachineEvent>,
    pub sensor_metrics: Vec<SensorMetric>,
    pub quality_events: Vec<QualityEvent>,
}

impl TickBatch {
    fn new(tick: ClockTick, machines: usize) -> Self {
        Self {
            tick,
            machine_events: Vec::new(),
            sensor_metrics: Vec::with_capacity(machines),
            quality_events: Vec::new(),
        }
    }

    fn push(&mut self, output: TickOutput) {
        self.machine_events.extend(output.events);
        self.sensor_metrics.push(output.sensor);
        self.quality_events.extend(output.quality);
    }

    pub fn epoch(&self) -> Epoch {
        self.tick.tick
    }

    pub fn len(&self) -> usize {
        self.machine_events.len() + self.sensor_metrics.len() + self.quality_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Machine events, then sensor metrics, then quality events.
    pub fn envelopes(&self) -> impl Iterator<Item = EventEnvelope<PlantRecord>> + '_ {
        let epoch = self.epoch();
        self.machine_events
            .iter()
            .cloned()
            .map(PlantRecord::Machine)
            .chain(self.sensor_metrics.iter().cloned().map(PlantRecord::Sensor))
            .chain(self.quality_events.iter().cloned().map(PlantRecord::Quality))
            .map(move |record| EventEnvelope::plant(epoch, record))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub accepted: u64,
    pub deferred: u64,
}

/// Drives a fleet of independent machines off one shared clock.
pub struct SimulationOrchestrator {
    settings: SimulationConfig,
    clock: SimClock,
    machines: Vec<MachineSimulator>,
    pending: Vec<MachineEvent>,
    metrics: MetricsRegistry,
}

impl SimulationOrchestrator {
    pub fn new(settings: SimulationConfig, machines: Vec<MachineConfig>) -> Result<Self, CoreError> {
        settings.validate()?;
        if machines.is_empty() {
            return Err(CoreError::Configuration("fleet has no machines".into()));
        }
        let mut seen = HashSet::new();
        for machine in &machines {
            if !seen.insert(machine.machine_id.clone()) {
                return Err(CoreError::Configuration(format!(
                    "duplicate machine id {}",
                    machine.machine_id
                )));
            }
        }

        let start_ms = settings.start_epoch_ms.unwrap_or_else(wall_clock_ms);
        let clock = SimClock::from_config(&settings, start_ms)?;
        let machines = machines
            .into_iter()
            .map(|config| MachineSimulator::new(config, &settings))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            machines = machines.len(),
            seed = settings.seed,
            workers = settings.workers,
            start_ms,
            "fleet initialized"
        );
        Ok(Self {
            settings,
            clock,
            machines,
            pending: Vec::new(),
            metrics: MetricsRegistry::default(),
        })
    }

    pub fn from_fleet(fleet: FleetConfig) -> Result<Self, CoreError> {
        Self::new(fleet.simulation, fleet.machines)
    }

    /// Shares counters with an outside observer.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn machines(&self) -> &[MachineSimulator] {
        &self.machines
    }

    pub fn machine(&self, machine_id: &str) -> Option<&MachineSimulator> {
        self.machines.iter().find(|m| m.machine_id() == machine_id)
    }

    /// Externally triggered transition. A rejected target is logged and the
    /// machine carries on; an accepted one is emitted with the next tick.
    pub fn force_transition(
        &mut self,
        machine_id: &str,
        target: MachineState,
        reason: TransitionReason,
    ) -> bool {
        let now_ms = self.clock.now_ms();
        let Some(machine) = self.machines.iter_mut().find(|m| m.machine_id() == machine_id) else {
            warn!(%machine_id, "forced transition for unknown machine");
            return false;
        };
        match machine.force_transition(target, reason, now_ms) {
            Ok(event) => {
                self.pending.push(event);
                true
            }
            Err(err) => {
                self.metrics.inc_rejected_transitions(1);
                warn!(%machine_id, error = %err, "forced transition rejected");
                false
            }
        }
    }

    /// Advances the clock one interval and updates every machine.
    pub fn tick(&mut self) -> TickBatch {
        let tick = self.clock.advance();
        let outputs = self.update_machines(tick);

        let mut batch = TickBatch::new(tick, self.machines.len());
        batch.machine_events.append(&mut self.pending);
        for output in outputs {
            batch.push(output);
        }

        self.metrics.inc_ticks(1);
        self.metrics.inc_machine_events(batch.machine_events.len() as u64);
        self.metrics.inc_sensor_metrics(batch.sensor_metrics.len() as u64);
        self.metrics.inc_quality_events(batch.quality_events.len() as u64);
        self.metrics.observe_anomalies(&batch.machine_events);
        debug!(
            tick = tick.tick,
            now_ms = tick.now_ms,
            records = batch.len(),
            "tick complete"
        );
        batch
    }

    fn update_machines(&mut self, tick: ClockTick) -> Vec<TickOutput> {
        let workers = self.settings.workers.min(self.machines.len()).max(1);
        if workers == 1 {
            return self
                .machines
                .iter_mut()
                .map(|m| m.update(tick.now_ms, tick.delta_secs))
                .collect();
        }

        let chunk = self.machines.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .machines
                .chunks_mut(chunk)
                .map(|group| {
                    scope.spawn(move || {
                        group
                            .iter_mut()
                            .map(|m| m.update(tick.now_ms, tick.delta_secs))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        })
    }

    /// Hands every record of `batch` to `sink` once. Deferred records are
    /// counted, not retried.
    pub fn publish<S: EventSink + ?Sized>(&self, batch: &TickBatch, sink: &mut S) -> PublishReport {
        let mut report = PublishReport::default();
        for envelope in batch.envelopes() {
            match sink.publish(envelope.payload.stream(), &envelope) {
                PublishOutcome::Accepted => report.accepted += 1,
                PublishOutcome::RetryLater => report.deferred += 1,
            }
        }
        if report.deferred > 0 {
            self.metrics.inc_publish_deferred(report.deferred);
            warn!(tick = batch.tick.tick, deferred = report.deferred, "sink deferred records");
        }
        report
    }

    pub fn statistics(&self) -> FleetStatistics {
        FleetStatistics::from_snapshots(
            self.clock.ticks(),
            self.clock.elapsed_secs(),
            self.machines.iter().map(MachineSimulator::snapshot).collect(),
        )
    }

    /// Ticks until `stop` is raised or `max_ticks` have run, pacing each tick
    /// by the clock's sleep interval.
    pub fn run<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        stop: &AtomicBool,
        max_ticks: Option<u64>,
    ) -> FleetStatistics {
        let pace = self.clock.sleep_interval();
        info!(
            machines = self.machines.len(),
            tick_interval_ms = self.clock.tick_interval().as_millis(),
            pace_ms = pace.as_millis(),
            ?max_ticks,
            "simulation starting"
        );
        let run_timer = EpochTimer::start();

        while !stop.load(Ordering::Relaxed) {
            if max_ticks.is_some_and(|max| self.clock.ticks() >= max) {
                break;
            }
            let timer = EpochTimer::start();
            let batch = self.tick();
            self.publish(&batch, sink);
            if batch.tick.tick % STATUS_LOG_EVERY == 0 {
                self.statistics().log();
            }
            let elapsed = timer.elapsed();
            self.metrics.record_tick_duration(elapsed);
            if let Some(remaining) = pace.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }

        if let Err(err) = sink.flush() {
            warn!(error = %err, "sink flush failed");
        }
        let stats = self.statistics();
        stats.log();
        let snapshot = self.metrics.snapshot();
        info!(
            summary = %snapshot.to_json_line("final", Some(run_timer.elapsed())),
            "simulation stopped"
        );
        stats
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use pf_core::{MachineType, Stream};

    fn settings() -> SimulationConfig {
        SimulationConfig {
            start_epoch_ms: Some(0),
            simulation_speed: 1_000_000.0,
            ..Default::default()
        }
    }

    fn fleet() -> Vec<MachineConfig> {
        crate::config::default_machines()
    }

    #[test]
    fn one_sensor_metric_per_machine_in_config_order() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        let batch = orch.tick();
        assert_eq!(batch.tick.tick, 1);
        assert_eq!(batch.tick.now_ms, 5_000);
        let ids: Vec<_> = batch.sensor_metrics.iter().map(|m| m.machine_id.as_str()).collect();
        assert_eq!(
            ids,
            ["machine_001", "machine_002", "machine_003", "machine_004", "machine_005"]
        );
    }

    #[test]
    fn rejects_empty_and_duplicate_fleets() {
        assert!(SimulationOrchestrator::new(settings(), Vec::new()).is_err());
        let mut machines = fleet();
        machines.push(MachineConfig::new("machine_001", MachineType::Press, 800, 30.0));
        assert!(matches!(
            SimulationOrchestrator::new(settings(), machines),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn invalid_machine_aborts_construction() {
        let mut machines = fleet();
        machines[2].nominal_rpm = 0;
        assert!(SimulationOrchestrator::new(settings(), machines).is_err());
    }

    #[test]
    fn unrepresentable_pacing_fails_construction() {
        let cfg = SimulationConfig { simulation_speed: 1e-20, ..settings() };
        assert!(matches!(
            SimulationOrchestrator::new(cfg, fleet()),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn rejected_force_is_absorbed() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        assert!(!orch.force_transition(
            "machine_001",
            MachineState::Maintenance,
            TransitionReason::PreventiveMaintenance
        ));
        assert!(!orch.force_transition("nope", MachineState::Warmup, TransitionReason::Other));
        assert_eq!(orch.metrics().snapshot().rejected_transitions, 1);
        assert_eq!(orch.machine("machine_001").unwrap().state(), MachineState::Idle);

        let batch = orch.tick();
        assert_eq!(batch.sensor_metrics.len(), 5);
    }

    #[test]
    fn accepted_force_is_emitted_with_next_tick() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        assert!(orch.force_transition("machine_004", MachineState::Warmup, TransitionReason::ShiftStart));
        let batch = orch.tick();
        let first = &batch.machine_events[0];
        assert_eq!(first.machine_id, "machine_004");
        assert_eq!(first.to_state, Some(MachineState::Warmup));
    }

    #[test]
    fn publish_counts_deferred_records() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        let batch = orch.tick();
        let mut sink = MemorySink::bounded(2);
        let report = orch.publish(&batch, &mut sink);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.deferred as usize, batch.len() - 2);
        assert_eq!(orch.metrics().snapshot().publish_deferred, report.deferred);
    }

    #[test]
    fn parallel_updates_match_sequential() {
        let run = |workers: usize| {
            let cfg = SimulationConfig { workers, ..settings() };
            let mut orch = SimulationOrchestrator::new(cfg, fleet()).unwrap();
            (0..200).map(|_| orch.tick()).collect::<Vec<_>>()
        };
        assert_eq!(run(1), run(3));
    }

    #[test]
    fn run_stops_after_max_ticks() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        let mut sink = MemorySink::new();
        let stop = AtomicBool::new(false);
        let stats = orch.run(&mut sink, &stop, Some(12));
        assert_eq!(stats.tick, 12);
        assert_eq!(sink.stream(Stream::SensorMetrics).count(), 60);
        assert_eq!(orch.metrics().snapshot().ticks, 12);
    }

    #[test]
    fn raised_stop_prevents_any_tick() {
        let mut orch = SimulationOrchestrator::new(settings(), fleet()).unwrap();
        let mut sink = MemorySink::new();
        let stop = AtomicBool::new(true);
        let stats = orch.run(&mut sink, &stop, None);
        assert_eq!(stats.tick, 0);
        assert!(sink.is_empty());
    }
}
