//! Runtime around the simulation engine: tracing and timely bootstrap, the
//! fleet orchestrator and the sinks it publishes into.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod sink;
pub mod stats;

pub use config::FleetConfig;
pub use orchestrator::{PublishReport, SimulationOrchestrator, TickBatch};
pub use sink::{EventSink, JsonLinesSink, MemorySink, PublishOutcome};
pub use stats::FleetStatistics;

/// Installs the fmt subscriber on stderr, filtered by `RUST_LOG` (INFO when unset).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Start a single-process timely runtime and execute the provided closure once per worker.
pub fn start_runtime<F>(workers: usize, f: F) -> Result<()>
where
    F: Fn(usize, &mut timely::worker::Worker<timely::communication::allocator::Generic>)
        + Send
        + Sync
        + 'static,
{
    let workers = workers.max(1);
    info!(%workers, "starting timely runtime");
    let guards = timely::execute(timely::Config::process(workers), move |worker| {
        let index = worker.index();
        f(index, worker);
    })
    .map_err(|e| anyhow::anyhow!(e))?;
    for result in guards.join() {
        result.map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}
