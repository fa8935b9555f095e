//! `flatperm`: run or resume a flatPERM simulation of triangular-lattice
//! self-avoiding walks.
//!
//! ```bash
//! # 10⁶ tours of walks up to length 100
//! flatperm --filename saw100.fps --length 100 --tours 1000000
//!
//! # 10⁶ more, with a new seed
//! flatperm --filename saw100.fps --resume --tours 1000000 --seed 2
//! ```
//!
//! Growth runs on a blocking thread. The async side only raises flags:
//!
//! - every `--checkpoint-interval` seconds and on SIGHUP → checkpoint,
//! - on SIGINT / SIGTERM → stop after unwinding the current walk.
//!
//! A checkpoint saves every histogram into the data file and logs
//! throughput. One last checkpoint is written when growth stops.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use flatperm_core::{
    FileStore, Flatperm, RunControl, RunReport, SawModel, Simulation, StatsBaseline, Triangular,
};

mod config;
use config::{Cli, RunConfig, StartMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = cli.into_config()?;
    info!(
        version  = env!("CARGO_PKG_VERSION"),
        file     = %config.filename.display(),
        tours    = config.tours,
        seed     = config.seed,
        "flatperm starting"
    );

    // ── Simulation + data file ────────────────────────────────────────────────
    let (sim, store) = open(&config)?;

    // ── Signals and timer ─────────────────────────────────────────────────────
    let mut signals = Signals::new().context("failed to install signal handlers")?;
    let mut timer = config
        .checkpoint_interval
        .map(|period| interval_at(Instant::now() + period, period));

    // ── Growth thread ─────────────────────────────────────────────────────────
    let control = Arc::new(RunControl::new());
    let mut growth = tokio::task::spawn_blocking({
        let control = Arc::clone(&control);
        let tours = config.tours;
        move || grow(sim, store, tours, &control)
    });

    let report = loop {
        tokio::select! {
            joined = &mut growth => break joined.context("growth thread panicked")?,
            _ = tick(&mut timer) => {
                info!("periodic checkpoint requested");
                control.request_checkpoint();
            }
            request = signals.recv() => match request {
                Request::Checkpoint => {
                    info!("SIGHUP received, checkpoint requested");
                    control.request_checkpoint();
                }
                Request::Stop => {
                    if control.is_cancelled() {
                        warn!("already stopping, waiting for the growth thread");
                    } else {
                        info!("stop requested, unwinding the current tour");
                    }
                    control.request_cancel();
                }
            },
        }
    };

    match report {
        Ok(report) => {
            info!(
                tours       = report.tours,
                total_tours = report.total_tours,
                steps       = report.steps,
                prunings    = report.prunings,
                enrichments = report.enrichments,
                checkpoints = report.checkpoints,
                cancelled   = report.cancelled,
                "flatperm finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "simulation aborted");
            Err(e)
        }
    }
}

/// Build the simulation and the store it checkpoints into.
fn open(config: &RunConfig) -> anyhow::Result<(Simulation<Triangular>, FileStore)> {
    match config.mode {
        StartMode::Fresh { length, mu } => {
            let sim = Simulation::<Triangular>::new(length, mu, config.seed)?;
            let mut store = FileStore::create(&config.filename);
            // Fail before any work if the file cannot be written.
            sim.save(&mut store)?;
            store
                .flush()
                .with_context(|| format!("cannot write {}", config.filename.display()))?;
            Ok((sim, store))
        }
        StartMode::Resume => {
            let store = FileStore::open(&config.filename)
                .with_context(|| format!("cannot resume from {}", config.filename.display()))?;
            let sim = Simulation::<Triangular>::resume(&store, config.seed)?;
            Ok((sim, store))
        }
    }
}

/// Body of the growth thread: run, serving checkpoints, then save once more.
fn grow(
    mut sim: Simulation<Triangular>,
    mut store: FileStore,
    tours: u64,
    control: &RunControl,
) -> anyhow::Result<RunReport> {
    let baseline = sim.baseline();
    let report = sim.run(tours, control, |engine, model| {
        checkpoint(&mut store, engine, model, &baseline)
    })?;
    checkpoint(&mut store, sim.engine(), sim.model(), &baseline)?;
    Ok(report)
}

fn checkpoint(
    store: &mut FileStore,
    engine: &Flatperm<2>,
    model: &SawModel<Triangular>,
    baseline: &StatsBaseline,
) -> flatperm_core::Result<()> {
    model.save(engine, store)?;
    store.flush()?;
    let stats = baseline.stats(engine, model);
    info!(
        tours           = stats.tours,
        tours_per_sec   = format_args!("{:.1}", stats.tours_per_sec),
        samples         = stats.samples,
        samples_per_sec = format_args!("{:.1}", stats.samples_per_sec),
        elapsed_secs    = stats.elapsed.as_secs(),
        file            = %store.path().display(),
        "checkpoint written"
    );
    Ok(())
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────

enum Request {
    Checkpoint,
    Stop,
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Request {
        tokio::select! {
            _ = self.hangup.recv() => Request::Checkpoint,
            _ = self.interrupt.recv() => Request::Stop,
            _ = self.terminate.recv() => Request::Stop,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Request {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Request::Stop,
            Err(_) => std::future::pending().await,
        }
    }
}
