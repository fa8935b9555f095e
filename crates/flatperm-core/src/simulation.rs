//! [`Simulation`]: engine, model and random source under one owner.

use std::time::{Duration, Instant};

use flatperm_lattice::{Lattice, Triangular};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::engine::{Flatperm, RunControl, RunReport, Strategy};
use crate::error::{FlatpermError, Result};
use crate::model::{SawModel, INDICES};
use crate::store::ArrayStore;

/// Throughput since the simulation was built.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    /// Tours started over the whole history of the histograms.
    pub tours: u64,
    /// Steps registered over the whole history of the histograms.
    pub samples: u64,
    pub elapsed: Duration,
    /// Tours per second in this process.
    pub tours_per_sec: f64,
    /// Steps per second in this process.
    pub samples_per_sec: f64,
}

/// A flatPERM simulation of walks on lattice `L`.
#[derive(Debug)]
pub struct Simulation<L: Lattice = Triangular> {
    engine: Flatperm<INDICES>,
    model: SawModel<L>,
    rng: StdRng,
    baseline: StatsBaseline,
}

fn validate(max_length: usize, mu: f64) -> Result<()> {
    if max_length == 0 {
        return Err(FlatpermError::Configuration("maximum length must be at least 1".into()));
    }
    if i32::try_from(max_length).is_err() {
        return Err(FlatpermError::Configuration(format!(
            "maximum length {max_length} does not fit the lattice coordinates"
        )));
    }
    if !(mu.is_finite() && mu > 0.0) {
        return Err(FlatpermError::Configuration(format!(
            "mu must be finite and positive, got {mu}"
        )));
    }
    Ok(())
}

impl<L: Lattice> Simulation<L> {
    /// Fresh simulation of walks up to `max_length` steps.
    pub fn new(max_length: usize, mu: f64, seed: u64) -> Result<Self> {
        validate(max_length, mu)?;
        let model = SawModel::new(max_length, mu);
        let engine = Flatperm::new(model.extents(), mu)?;
        info!(lattice = L::NAME, max_length, mu, seed, "new simulation");
        Ok(Self::assemble(engine, model, seed))
    }

    /// Continue a simulation saved with [`Simulation::save`].
    ///
    /// `N` and `mu` come from the store. The random state is not stored, so
    /// the continuation draws from a fresh `seed`.
    pub fn resume<S: ArrayStore + ?Sized>(store: &S, seed: u64) -> Result<Self> {
        let (max_length, mu) = SawModel::<L>::read_parameters(store)?;
        validate(max_length, mu)?;

        let mut model = SawModel::new(max_length, mu);
        let mut engine = Flatperm::new(model.extents(), mu)?;
        engine.load(store)?;
        model.load(store)?;
        info!(
            lattice = L::NAME,
            max_length,
            mu,
            seed,
            tours = engine.tours(),
            "resumed simulation"
        );
        Ok(Self::assemble(engine, model, seed))
    }

    fn assemble(engine: Flatperm<INDICES>, model: SawModel<L>, seed: u64) -> Self {
        let baseline =
            StatsBaseline { started: Instant::now(), tours: engine.tours(), samples: model.samples() };
        Self { engine, model, rng: StdRng::seed_from_u64(seed), baseline }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.engine = self.engine.with_strategy(strategy);
        self
    }

    pub fn engine(&self) -> &Flatperm<INDICES> {
        &self.engine
    }

    pub fn model(&self) -> &SawModel<L> {
        &self.model
    }

    pub fn tours(&self) -> u64 {
        self.engine.tours()
    }

    /// Run `additional_tours` more tours.
    ///
    /// `on_checkpoint` is called on this thread whenever `control` asks for
    /// a checkpoint; see [`Flatperm::run_with`].
    pub fn run<F>(&mut self, additional_tours: u64, control: &RunControl, on_checkpoint: F) -> Result<RunReport>
    where
        F: FnMut(&Flatperm<INDICES>, &SawModel<L>) -> Result<()>,
    {
        let target = self.engine.tours().saturating_add(additional_tours);
        self.engine.run_with(&mut self.model, target, &mut self.rng, control, on_checkpoint)
    }

    /// Write everything needed to resume.
    pub fn save<S: ArrayStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        self.model.save(&self.engine, store)
    }

    pub fn stats(&self) -> RunStats {
        self.baseline.stats(&self.engine, &self.model)
    }

    /// Throughput reference point, for checkpoint hooks that see the engine
    /// and model but cannot borrow the simulation.
    pub fn baseline(&self) -> StatsBaseline {
        self.baseline
    }
}

/// Where throughput is measured from.
#[derive(Debug, Clone, Copy)]
pub struct StatsBaseline {
    started: Instant,
    tours: u64,
    samples: u64,
}

impl StatsBaseline {
    pub fn stats<L: Lattice>(&self, engine: &Flatperm<INDICES>, model: &SawModel<L>) -> RunStats {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let tours = engine.tours();
        let samples = model.samples();
        RunStats {
            tours,
            samples,
            elapsed,
            tours_per_sec: tours.saturating_sub(self.tours) as f64 / secs,
            samples_per_sec: samples.saturating_sub(self.samples) as f64 / secs,
        }
    }
}
