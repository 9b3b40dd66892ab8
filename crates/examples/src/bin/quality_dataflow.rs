use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use differential_dataflow::input::InputSession;
use differential_dataflow::operators::reduce::Reduce;
use timely::dataflow::operators::probe::Handle as ProbeHandle;

use pf_core::{EventType, MachineState, QualityResult};
use pf_runtime::metrics::EpochTimer;
use pf_runtime::{init_tracing, start_runtime, FleetConfig, SimulationOrchestrator};

#[derive(Debug, Parser)]
#[command(about = "Feed simulated fleet output into a differential dataflow")]
struct Cli {
    /// Timely worker threads; machines are partitioned across them
    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value_t = 24)]
    epochs: u64,

    /// Simulation ticks folded into one dataflow epoch
    #[arg(long, default_value_t = 120)]
    ticks_per_epoch: u64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut fleet = FleetConfig::default();
    fleet.simulation.seed = cli.seed;
    fleet.simulation.time_multiplier = 12.0;
    fleet.simulation.start_epoch_ms = Some(0);
    fleet.validate()?;

    let Cli { workers, epochs, ticks_per_epoch, .. } = cli;
    info!(workers, epochs, ticks_per_epoch, "quality_dataflow starting");
    start_dataflow(workers, fleet, epochs, ticks_per_epoch)
}

fn start_dataflow(workers: usize, fleet: FleetConfig, epochs: u64, ticks_per_epoch: u64) -> Result<()> {
    start_runtime(workers, move |index, worker| {
        let peers = worker.peers();
        // Every worker replays the same seeded fleet and feeds only its own machines.
        let mut orchestrator = match SimulationOrchestrator::from_fleet(fleet.clone()) {
            Ok(orchestrator) => orchestrator,
            Err(err) => {
                error!(index, error = %err, "fleet construction failed");
                return;
            }
        };
        let owned: Vec<String> = fleet
            .machines
            .iter()
            .enumerate()
            .filter(|(position, _)| position % peers == index)
            .map(|(_, machine)| machine.machine_id.clone())
            .collect();

        let mut quality: InputSession<_, (String, bool), isize> = InputSession::new();
        let mut transitions: InputSession<_, (String, MachineState), isize> = InputSession::new();
        let mut probe = ProbeHandle::new();

        worker.dataflow::<u64, _, _>(|scope| {
            quality
                .to_collection(scope)
                .reduce(|_machine, inputs, output| {
                    let mut good: isize = 0;
                    let mut inspected: isize = 0;
                    for (passed, count) in inputs.iter() {
                        inspected += *count;
                        if **passed {
                            good += *count;
                        }
                    }
                    let rate = if inspected > 0 { good * 1_000 / inspected } else { 1_000 };
                    output.push(((good as i64, inspected as i64, rate as i64), 1));
                })
                .inspect(|x| info!(?x, "quality per machine (good, inspected, per-mille)"))
                .probe_with(&mut probe);

            transitions
                .to_collection(scope)
                .map(|(machine, state)| ((machine, state), ()))
                .reduce(|_key, inputs, output| {
                    let entered: isize = inputs.iter().map(|(_, count)| *count).sum();
                    output.push((entered as i64, 1));
                })
                .filter(|((_, state), _)| {
                    matches!(state, MachineState::UnplannedDowntime | MachineState::Maintenance)
                })
                .inspect(|x| info!(?x, "downtime entries per machine"))
                .probe_with(&mut probe);
        });

        for epoch in 0..epochs {
            let epoch_timer = EpochTimer::start();
            for _ in 0..ticks_per_epoch {
                let batch = orchestrator.tick();
                for ev in &batch.machine_events {
                    if ev.event_type != EventType::StatusChange || !owned.contains(&ev.machine_id) {
                        continue;
                    }
                    if let Some(state) = ev.to_state {
                        transitions.insert((ev.machine_id.clone(), state));
                    }
                }
                for q in &batch.quality_events {
                    if owned.contains(&q.machine_id) {
                        quality.insert((q.machine_id.clone(), q.result == QualityResult::Ok));
                    }
                }
            }

            quality.advance_to(epoch + 1);
            transitions.advance_to(epoch + 1);
            quality.flush();
            transitions.flush();
            while probe.less_than(quality.time()) {
                worker.step();
            }

            let snapshot = orchestrator.metrics().snapshot();
            info!(
                index,
                epoch,
                duration_ms = epoch_timer.elapsed().as_millis(),
                quality_events = snapshot.quality_events,
                anomalies = snapshot.anomalies_injected,
                "epoch complete"
            );
        }
        if index == 0 {
            orchestrator.statistics().log();
        }
    })
}
