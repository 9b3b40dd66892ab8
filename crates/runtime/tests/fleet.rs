use std::sync::atomic::AtomicBool;

use pf_core::{EventType, MachineConfig, MachineType, PlantRecord, SimulationConfig, Stream};
use pf_runtime::metrics::MetricsRegistry;
use pf_runtime::{FleetConfig, JsonLinesSink, MemorySink, SimulationOrchestrator};

fn settings() -> SimulationConfig {
    SimulationConfig {
        start_epoch_ms: Some(1_700_000_000_000),
        simulation_speed: 1_000_000.0,
        time_multiplier: 12.0,
        seed: 2024,
        ..Default::default()
    }
}

fn events_of(batches: &[pf_runtime::TickBatch], machine_id: &str) -> Vec<pf_core::MachineEvent> {
    batches
        .iter()
        .flat_map(|b| b.machine_events.iter())
        .filter(|e| e.machine_id == machine_id)
        .cloned()
        .collect()
}

#[test]
fn sibling_config_does_not_change_a_machine() {
    let mill = MachineConfig::new("mill", MachineType::CncMill, 3000, 45.0);
    let press = MachineConfig::new("press", MachineType::Press, 800, 30.0);
    let mut hot_press = press.clone();
    hot_press.anomaly_injection_probability = 0.9;
    hot_press.cycle_duration_secs = 5.0;
    hot_press.reliability.mtbf_hours = 0.1;

    let run = |machines: Vec<MachineConfig>| {
        let mut orch = SimulationOrchestrator::new(settings(), machines).unwrap();
        (0..2_000).map(|_| orch.tick()).collect::<Vec<_>>()
    };
    let baseline = run(vec![mill.clone(), press]);
    let altered = run(vec![mill.clone(), hot_press]);
    let alone = run(vec![mill]);

    let mill_events = events_of(&baseline, "mill");
    assert!(!mill_events.is_empty());
    assert_eq!(mill_events, events_of(&altered, "mill"));
    assert_eq!(mill_events, events_of(&alone, "mill"));
    assert_ne!(events_of(&baseline, "press"), events_of(&altered, "press"));
}

#[test]
fn run_publishes_every_stream_through_the_sink() {
    let metrics = MetricsRegistry::default();
    let mut orch = SimulationOrchestrator::from_fleet(FleetConfig {
        simulation: settings(),
        ..FleetConfig::default()
    })
    .unwrap()
    .with_metrics(metrics.clone());

    let mut sink = MemorySink::new();
    let stop = AtomicBool::new(false);
    let stats = orch.run(&mut sink, &stop, Some(3_000));

    let snap = metrics.snapshot();
    assert_eq!(snap.ticks, 3_000);
    assert_eq!(snap.sensor_metrics, 15_000);
    assert_eq!(snap.records() as usize, sink.len());
    assert!(snap.anomalies_injected >= snap.anomalies_ended);

    for (stream, envelope) in sink.records() {
        assert_eq!(*stream, envelope.payload.stream());
        assert_eq!(envelope.meta.kind, stream.as_str());
        assert_eq!(envelope.meta.key.as_deref(), Some(envelope.payload.machine_id()));
    }

    let cycles = sink
        .stream(Stream::MachineEvents)
        .filter(|r| matches!(r, PlantRecord::Machine(e) if e.event_type == EventType::CycleComplete))
        .count() as u64;
    assert_eq!(cycles, stats.total_cycles);
    assert!(stats.total_cycles > 0);

    let inspected = sink.stream(Stream::QualityEvents).count() as u64;
    assert_eq!(inspected, stats.good_parts + stats.bad_parts);
    assert!(inspected <= stats.total_cycles);
}

#[test]
fn timestamps_advance_by_the_simulated_interval() {
    let mut orch = SimulationOrchestrator::new(settings(), vec![MachineConfig::new(
        "lathe",
        MachineType::CncLathe,
        2500,
        60.0,
    )])
    .unwrap();
    let first = orch.tick();
    let second = orch.tick();
    assert_eq!(first.tick.delta_secs, 60.0);
    assert_eq!(second.sensor_metrics[0].ts_ms - first.sensor_metrics[0].ts_ms, 60_000);
}

#[test]
fn json_lines_output_parses_back() {
    let mut orch = SimulationOrchestrator::new(settings(), FleetConfig::default().machines).unwrap();
    let mut sink = JsonLinesSink::new(Vec::new());
    let stop = AtomicBool::new(false);
    orch.run(&mut sink, &stop, Some(50));
    let written = sink.written();

    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(text.lines().count() as u64, written);
    for line in text.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["meta"]["domain"], "plant");
        assert!(value["meta"]["epoch"].as_u64().unwrap() >= 1);
    }
}
