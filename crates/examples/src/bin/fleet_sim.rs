use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pf_runtime::metrics::MetricsRegistry;
use pf_runtime::{init_tracing, FleetConfig, JsonLinesSink, SimulationOrchestrator};

#[derive(Debug, Parser)]
#[command(author, about = "Simulate a machine fleet and write its streams as JSON lines")]
struct Cli {
    /// Fleet configuration (YAML). The built-in five-machine line is used when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Stop after this many wall-clock seconds
    #[arg(long)]
    for_secs: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Simulated seconds per wall second
    #[arg(long)]
    time_multiplier: Option<f64>,

    /// Divides the pause between ticks
    #[arg(long)]
    speed: Option<f64>,

    #[arg(long)]
    interval_secs: Option<f64>,

    #[arg(long)]
    no_anomalies: bool,

    /// Threads used to update machines within a tick
    #[arg(long)]
    workers: Option<usize>,

    /// Output path. Use '-' for stdout.
    #[arg(long, default_value = "-")]
    output: PathBuf,
}

impl Cli {
    fn fleet(&self) -> Result<FleetConfig> {
        let mut fleet = match &self.config {
            Some(path) => FleetConfig::load(path)?,
            None => FleetConfig::default(),
        };
        let sim = &mut fleet.simulation;
        if let Some(seed) = self.seed {
            sim.seed = seed;
        }
        if let Some(multiplier) = self.time_multiplier {
            sim.time_multiplier = multiplier;
        }
        if let Some(speed) = self.speed {
            sim.simulation_speed = speed;
        }
        if let Some(interval) = self.interval_secs {
            sim.tick_interval_secs = interval;
        }
        if let Some(workers) = self.workers {
            sim.workers = workers;
        }
        if self.no_anomalies {
            sim.anomaly_injection_enabled = false;
        }
        fleet.validate().context("invalid settings after command-line overrides")?;
        Ok(fleet)
    }

    fn writer(&self) -> Result<Box<dyn Write>> {
        if self.output.as_os_str() == "-" {
            return Ok(Box::new(BufWriter::new(io::stdout().lock())));
        }
        let file = File::create(&self.output)
            .with_context(|| format!("failed to create {}", self.output.display()))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let fleet = cli.fleet()?;
    info!(
        machines = fleet.machines.len(),
        seed = fleet.simulation.seed,
        output = %cli.output.display(),
        "fleet_sim starting"
    );

    let metrics = MetricsRegistry::default();
    let mut orchestrator = SimulationOrchestrator::from_fleet(fleet)?.with_metrics(metrics.clone());
    let mut sink = JsonLinesSink::new(cli.writer()?);

    let stop = Arc::new(AtomicBool::new(false));
    if let Some(secs) = cli.for_secs {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            stop.store(true, Ordering::Relaxed);
        });
    }

    let stats = orchestrator.run(&mut sink, &stop, cli.ticks);
    let snapshot = metrics.snapshot();
    info!(
        ticks = stats.tick,
        written = sink.written(),
        deferred = snapshot.publish_deferred,
        quality_rate = stats.overall_quality_rate,
        "fleet_sim finished"
    );
    Ok(())
}
