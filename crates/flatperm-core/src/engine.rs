//! [`Flatperm`]: flat-histogram pruned-enriched Rosenbluth growth.
//!
//! ## Tour protocol
//!
//! Every tour grows a configuration from the empty state and returns to it.
//! At each step:
//!
//! 1. **Atmosphere**: ask the model for its legal continuations.
//! 2. **Decide**: compare the branch weight against the running weight
//!    histogram at the current index and pick a clone count: `0` prunes,
//!    `1` continues, more enriches. The weight is renormalised so the
//!    estimator stays unbiased.
//! 3. **Rosenbluth factor**: `W ← W · |atmosphere| / mu`.
//! 4. **Backtrack or branch**: a pruned branch unwinds to the last
//!    enrichment and resumes from its next pending clone; an enriched branch
//!    pushes a history mark holding the remaining clones.
//! 5. **Register**: the model appends the chosen continuation and updates
//!    its index; the engine deposits `W` into the histograms there.
//!
//! The tour ends when a pruned branch finds the history stack empty.
//!
//! Randomness is drawn at exactly two places, in this order: one uniform
//! number when the ratio test is below one, one shuffle when at least one
//! clone survives. A fixed seed therefore reproduces a run bit for bit.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, trace};

use crate::error::{FlatpermError, Result};
use crate::histogram::Histogram;
use crate::store::ArrayStore;

// ─────────────────────────────────────────────
// Model contract
// ─────────────────────────────────────────────

/// A growable configuration the engine can drive.
///
/// The model owns the classification index. Its first component must be the
/// current length (number of registered steps).
pub trait Model<const D: usize> {
    /// One continuation of the current configuration.
    type Point: Clone;

    /// Continuations that keep the configuration valid, in a fixed order.
    fn atmosphere(&self) -> Result<Vec<Self::Point>>;

    /// Append `point`, carrying the branch weight `weight`.
    fn register_step(&mut self, point: Self::Point, weight: f64) -> Result<()>;

    /// Remove the most recent step.
    fn unregister_step(&mut self) -> Result<()>;

    /// Classification index of the current configuration.
    fn index(&self) -> [usize; D];
}

// ─────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────

/// Default warm-up delay: a length-`n` index joins the ratio test only after
/// `0.1 · n` tours have started.
pub const DEFAULT_WARMUP_DELAY: f64 = 0.1;

/// How the clone count is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Flat-histogram prune/enrich ratio test.
    #[default]
    FlatHistogram,
    /// Always exactly one clone while growth is possible: plain Rosenbluth
    /// sampling, whose mean weights count configurations.
    Rosenbluth,
}

// ─────────────────────────────────────────────
// Run control
// ─────────────────────────────────────────────

/// Flags another thread can raise to steer a running engine.
///
/// The engine polls them at safe points: before each tour and at the top of
/// each growth step.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: AtomicBool,
    checkpoint: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at the next safe point. Sticky.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Invoke the checkpoint hook once at the next safe point.
    pub fn request_checkpoint(&self) {
        self.checkpoint.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Clears a pending checkpoint request, returning whether there was one.
    pub fn take_checkpoint_request(&self) -> bool {
        self.checkpoint.swap(false, Ordering::AcqRel)
    }
}

// ─────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────

/// Summary of one call to [`Flatperm::run_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Tours started during this call.
    pub tours: u64,
    /// Tours started over the whole history of the histograms.
    pub total_tours: u64,
    /// Steps registered.
    pub steps: u64,
    pub prunings: u64,
    /// Extra clones created (`copies − 1` summed over enrichments).
    pub enrichments: u64,
    /// Checkpoint hook invocations.
    pub checkpoints: u64,
    /// `true` if the run stopped on a cancel request.
    pub cancelled: bool,
}

// ─────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────

/// Pending clones of one enrichment.
#[derive(Debug)]
struct Mark<P> {
    length: usize,
    weight: f64,
    clones: Vec<P>,
}

/// flatPERM engine over a `D`-dimensional classification index.
#[derive(Debug, Clone)]
pub struct Flatperm<const D: usize> {
    extents: [usize; D],
    mu: f64,
    strategy: Strategy,
    warmup_delay: f64,

    /// Summed weights.
    pub sw: Histogram<f64, D>,
    /// Summed effective-sample fractions.
    pub se: Histogram<f64, D>,
    /// Visit counts.
    pub sn: Histogram<u64, D>,
    /// Extra clones created at each index.
    pub enr: Histogram<u64, D>,
    /// Prunings at each index.
    pub pru: Histogram<u64, D>,
}

impl<const D: usize> Flatperm<D> {
    /// Zeroed engine with the given index extents and weight renormalisation.
    ///
    /// `extents[0]` is one more than the maximum length.
    pub fn new(extents: [usize; D], mu: f64) -> Result<Self> {
        if D == 0 || extents.iter().any(|&e| e == 0) {
            return Err(FlatpermError::Configuration(format!(
                "every extent must be positive, got {extents:?}"
            )));
        }
        if !(mu.is_finite() && mu > 0.0) {
            return Err(FlatpermError::Configuration(format!(
                "mu must be finite and positive, got {mu}"
            )));
        }
        info!(?extents, mu, "flatPERM initialised");
        Ok(Self {
            extents,
            mu,
            strategy: Strategy::default(),
            warmup_delay: DEFAULT_WARMUP_DELAY,
            sw: Histogram::new(extents),
            se: Histogram::new(extents),
            sn: Histogram::new(extents),
            enr: Histogram::new(extents),
            pru: Histogram::new(extents),
        })
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_warmup_delay(mut self, delay: f64) -> Self {
        self.warmup_delay = delay;
        self
    }

    pub fn extents(&self) -> [usize; D] {
        self.extents
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn warmup_delay(&self) -> f64 {
        self.warmup_delay
    }

    /// Tours started so far. Every tour deposits weight 1 at the empty state.
    pub fn tours(&self) -> u64 {
        self.sw[[0; D]] as u64
    }

    /// Run tours until [`Flatperm::tours`] reaches `target_tours`.
    pub fn run<M, R>(&mut self, model: &mut M, target_tours: u64, rng: &mut R) -> Result<RunReport>
    where
        M: Model<D>,
        R: Rng,
    {
        self.run_with(model, target_tours, rng, &RunControl::new(), |_, _| Ok(()))
    }

    /// [`Flatperm::run`] with cooperative cancellation and checkpoints.
    ///
    /// A checkpoint request makes the engine call `on_checkpoint` with the
    /// engine and model paused between two steps. A cancel request unwinds
    /// the model to the empty state, leaving the histograms as they are, and
    /// returns a report with `cancelled` set.
    pub fn run_with<M, R, F>(
        &mut self,
        model: &mut M,
        target_tours: u64,
        rng: &mut R,
        control: &RunControl,
        mut on_checkpoint: F,
    ) -> Result<RunReport>
    where
        M: Model<D>,
        R: Rng,
        F: FnMut(&Self, &M) -> Result<()>,
    {
        let zero = [0usize; D];
        let mut s = self.tours();
        let mut report = RunReport::default();
        let mut history: Vec<Mark<M::Point>> = Vec::with_capacity(self.extents[0]);

        info!(tours = s, target = target_tours, strategy = ?self.strategy, "run started");

        'tours: while s < target_tours {
            if self.safe_point(model, &mut history, control, &mut on_checkpoint, &mut report)? {
                break;
            }
            if model.index() != zero {
                return Err(FlatpermError::CorruptHistory(format!(
                    "tour must start from the empty state, model is at {:?}",
                    model.index()
                )));
            }

            s += 1;
            report.tours += 1;
            let mut w = 1.0_f64;
            self.sw[zero] += w;
            self.sn[zero] += 1;
            self.se[zero] += 1.0;

            loop {
                if self.safe_point(model, &mut history, control, &mut on_checkpoint, &mut report)? {
                    break 'tours;
                }

                let index = model.index();
                let length = index[0];
                let mut atmosphere = model.atmosphere()?;

                let copies = self.decide(index, atmosphere.len(), s, &mut w, rng);
                w *= atmosphere.len() as f64 / self.mu;

                let next = if copies == 0 {
                    self.pru[index] += 1;
                    report.prunings += 1;

                    let branch_length = history.last().map_or(0, |m| m.length);
                    while model.index()[0] > branch_length {
                        model.unregister_step()?;
                    }
                    let Some(mark) = history.last_mut() else {
                        trace!(tour = s, "tour finished");
                        break;
                    };
                    w = mark.weight;
                    mark.clones.pop()
                } else {
                    self.enr[index] += (copies - 1) as u64;
                    report.enrichments += (copies - 1) as u64;

                    atmosphere.shuffle(rng);
                    atmosphere.truncate(copies);
                    let next = atmosphere.pop();
                    if !atmosphere.is_empty() {
                        history.push(Mark { length, weight: w, clones: atmosphere });
                    }
                    next
                };

                if history.last().is_some_and(|m| m.clones.is_empty()) {
                    history.pop();
                }
                let Some(next) = next else {
                    return Err(FlatpermError::CorruptHistory(format!(
                        "no pending clone at length {length}"
                    )));
                };

                model.register_step(next, w)?;
                report.steps += 1;

                let index = model.index();
                let n = index[0];
                let independent = n - history.last().map_or(0, |m| m.length);
                self.sw[index] += w;
                self.sn[index] += 1;
                self.se[index] += independent as f64 / n as f64;
            }
        }

        report.total_tours = self.tours();
        info!(
            tours = report.tours,
            total_tours = report.total_tours,
            steps = report.steps,
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    /// Number of clones for the current branch, renormalising `w`.
    fn decide<R: Rng>(
        &self,
        index: [usize; D],
        atmosphere: usize,
        s: u64,
        w: &mut f64,
        rng: &mut R,
    ) -> usize {
        let length = index[0];
        if length + 1 >= self.extents[0] || atmosphere == 0 {
            *w = 0.0;
            return 0;
        }

        match self.strategy {
            Strategy::Rosenbluth => 1,
            Strategy::FlatHistogram => {
                let s = s as f64;
                let delay = self.warmup_delay * length as f64;
                if delay >= s {
                    *w = 0.0;
                    return 0;
                }

                let s_rel = s - delay.floor();
                let target_weight = self.sw[index] / s_rel;
                let tw_correction = self.se[index] / s_rel;
                let ratio = *w / target_weight / tw_correction;

                if ratio < 1.0 {
                    if rng.gen::<f64>() < ratio {
                        *w /= ratio;
                        1
                    } else {
                        *w = 0.0;
                        0
                    }
                } else {
                    // NaN saturates to zero copies.
                    let copies = atmosphere.min(ratio.floor() as usize);
                    if copies == 0 {
                        *w = 0.0;
                    } else {
                        *w /= copies as f64;
                    }
                    copies
                }
            }
        }
    }

    /// Service pending control requests. Returns `true` if the run must stop.
    fn safe_point<M, F>(
        &self,
        model: &mut M,
        history: &mut Vec<Mark<M::Point>>,
        control: &RunControl,
        on_checkpoint: &mut F,
        report: &mut RunReport,
    ) -> Result<bool>
    where
        M: Model<D>,
        F: FnMut(&Self, &M) -> Result<()>,
    {
        if control.take_checkpoint_request() {
            debug!(tours = self.tours(), length = model.index()[0], "checkpoint");
            on_checkpoint(self, &*model)?;
            report.checkpoints += 1;
        }
        if control.is_cancelled() {
            history.clear();
            while model.index()[0] > 0 {
                model.unregister_step()?;
            }
            report.cancelled = true;
            return Ok(true);
        }
        Ok(false)
    }

    // ── Persistence ─────────────────────────────────

    /// Write `sW`, `Sn`, `Se`, `Enr` and `Pru`.
    pub fn save<S: ArrayStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        self.sw.save(store, "sW")?;
        self.sn.save(store, "Sn")?;
        self.se.save(store, "Se")?;
        self.enr.save(store, "Enr")?;
        self.pru.save(store, "Pru")?;
        debug!(tours = self.tours(), "saved flatPERM histograms");
        Ok(())
    }

    /// Replace the histograms with the stored ones; shapes must match.
    pub fn load<S: ArrayStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.sw.load(store, "sW")?;
        self.sn.load(store, "Sn")?;
        self.se.load(store, "Se")?;
        self.enr.load(store, "Enr")?;
        self.pru.load(store, "Pru")?;
        debug!(tours = self.tours(), "loaded flatPERM histograms");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::store::{MemoryStore, StoreError};

    /// Every node has `fanout` children; records each registered weight.
    struct Tree {
        depth: usize,
        fanout: usize,
        log: Vec<(usize, f64)>,
        cancel_after: Option<(usize, Arc<RunControl>)>,
    }

    impl Tree {
        fn new(fanout: usize) -> Self {
            Self { depth: 0, fanout, log: Vec::new(), cancel_after: None }
        }
    }

    impl Model<1> for Tree {
        type Point = usize;

        fn atmosphere(&self) -> Result<Vec<usize>> {
            Ok((0..self.fanout).collect())
        }

        fn register_step(&mut self, _: usize, weight: f64) -> Result<()> {
            self.depth += 1;
            self.log.push((self.depth, weight));
            if let Some((after, control)) = &self.cancel_after {
                if self.log.len() == *after {
                    control.request_cancel();
                }
            }
            Ok(())
        }

        fn unregister_step(&mut self) -> Result<()> {
            self.depth -= 1;
            Ok(())
        }

        fn index(&self) -> [usize; 1] {
            [self.depth]
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    // ── construction ──

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(Flatperm::new([0, 2], 1.0), Err(FlatpermError::Configuration(_))));
        assert!(matches!(Flatperm::new([3], 0.0), Err(FlatpermError::Configuration(_))));
        assert!(matches!(Flatperm::new([3], f64::NAN), Err(FlatpermError::Configuration(_))));
        let engine = Flatperm::new([3, 2], 1.5).unwrap();
        assert_eq!(engine.tours(), 0);
        assert_eq!(engine.strategy(), Strategy::FlatHistogram);
        assert_eq!(engine.warmup_delay(), DEFAULT_WARMUP_DELAY);
    }

    // ── growth ──

    #[test]
    fn first_tour_is_a_single_chain() {
        let mut engine = Flatperm::new([4], 1.0).unwrap();
        let mut tree = Tree::new(3);
        let report = engine.run(&mut tree, 1, &mut rng()).unwrap();

        assert_eq!(tree.log, vec![(1, 3.0), (2, 9.0), (3, 27.0)]);
        assert_eq!(tree.depth, 0);
        assert_eq!(engine.tours(), 1);
        assert_eq!(engine.sn.as_slice(), &[1, 1, 1, 1]);
        assert_eq!(engine.sw.as_slice(), &[1.0, 3.0, 9.0, 27.0]);
        assert_eq!(engine.pru.as_slice(), &[0, 0, 0, 1]);
        assert_eq!(report.tours, 1);
        assert_eq!(report.steps, 3);
        assert_eq!(report.prunings, 1);
        assert!(!report.cancelled);
    }

    #[test]
    fn enrichment_splits_weight_evenly() {
        let mut engine = Flatperm::new([2], 2.0).unwrap();
        // One earlier tour with no effective samples doubles the ratio at
        // the root on the next tour.
        engine.sw[[0]] = 1.0;
        let mut tree = Tree::new(3);
        engine.run(&mut tree, 2, &mut rng()).unwrap();

        // ratio 2 → two clones of weight 1/2, each times 3/mu.
        assert_eq!(tree.log, vec![(1, 0.75), (1, 0.75)]);
        let total: f64 = tree.log.iter().map(|&(_, w)| w).sum();
        assert_eq!(total, 1.0 * 3.0 / 2.0);
        assert_eq!(engine.enr[[0]], 1);
        assert_eq!(engine.pru[[1]], 2);
        assert_eq!(engine.sn[[1]], 2);
        assert_eq!(engine.se[[1]], 2.0);
    }

    #[test]
    fn warmup_delay_gates_long_branches() {
        // S = 1 on the first tour, so length n is eligible while 0.1·n < 1.
        let mut engine = Flatperm::new([30], 1.0).unwrap();
        let mut tree = Tree::new(2);
        let report = engine.run(&mut tree, 1, &mut rng()).unwrap();
        assert_eq!(report.steps, 10);
        assert_eq!(engine.pru[[10]], 1);
        assert_eq!(engine.pru.as_slice().iter().sum::<u64>(), 1);
        assert_eq!(engine.sn[[11]], 0);

        let mut engine = Flatperm::new([30], 1.0).unwrap().with_warmup_delay(0.0);
        assert_eq!(engine.warmup_delay(), 0.0);
        let mut tree = Tree::new(2);
        let report = engine.run(&mut tree, 1, &mut rng()).unwrap();
        assert_eq!(report.steps, 29);
        assert_eq!(engine.pru[[29]], 1);
        assert_eq!(tree.depth, 0);
    }

    #[test]
    fn rosenbluth_weights_count_configurations() {
        let mut engine = Flatperm::new([4], 3.0).unwrap().with_strategy(Strategy::Rosenbluth);
        let mut tree = Tree::new(3);
        engine.run(&mut tree, 10, &mut rng()).unwrap();
        // 3ⁿ nodes at depth n, each tour weight (3/3)ⁿ.
        assert_eq!(engine.sw.as_slice(), &[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(engine.enr.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn weights_stay_non_negative_and_depth_bounded() {
        let mut engine = Flatperm::new([6], 1.0).unwrap();
        let mut tree = Tree::new(2);
        let report = engine.run(&mut tree, 200, &mut rng()).unwrap();
        assert_eq!(engine.tours(), 200);
        assert_eq!(report.tours, 200);
        assert!(tree.log.iter().all(|&(d, w)| d <= 5 && w >= 0.0 && w.is_finite()));
        assert_eq!(engine.sn.as_slice().iter().sum::<u64>(), 200 + report.steps);
    }

    #[test]
    fn run_target_is_absolute() {
        let mut engine = Flatperm::new([3], 1.0).unwrap();
        let mut tree = Tree::new(2);
        engine.run(&mut tree, 5, &mut rng()).unwrap();
        let report = engine.run(&mut tree, 5, &mut rng()).unwrap();
        assert_eq!(report.tours, 0);
        let report = engine.run(&mut tree, 8, &mut rng()).unwrap();
        assert_eq!(report.tours, 3);
        assert_eq!(report.total_tours, 8);
    }

    #[test]
    fn same_seed_reproduces_histograms() {
        let run = || {
            let mut engine = Flatperm::new([7], 1.0).unwrap();
            engine.run(&mut Tree::new(3), 50, &mut StdRng::seed_from_u64(99)).unwrap();
            engine
        };
        let (a, b) = (run(), run());
        assert_eq!(a.sw, b.sw);
        assert_eq!(a.se, b.se);
        assert_eq!(a.enr, b.enr);
    }

    // ── control ──

    #[test]
    fn cancel_before_start_runs_nothing() {
        let mut engine = Flatperm::new([4], 1.0).unwrap();
        let control = RunControl::new();
        control.request_cancel();
        let mut tree = Tree::new(3);
        let report =
            engine.run_with(&mut tree, 10, &mut rng(), &control, |_, _| Ok(())).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.tours, 0);
        assert_eq!(engine.tours(), 0);
    }

    #[test]
    fn cancel_mid_tour_unwinds_the_model() {
        let mut engine = Flatperm::new([10], 1.0).unwrap();
        let control = Arc::new(RunControl::new());
        let mut tree = Tree::new(2);
        tree.cancel_after = Some((4, Arc::clone(&control)));

        let report =
            engine.run_with(&mut tree, 1000, &mut rng(), &control, |_, _| Ok(())).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.steps, 4);
        assert_eq!(tree.depth, 0);
        assert!(engine.tours() < 1000);
    }

    #[test]
    fn checkpoint_hook_runs_once_per_request() {
        let mut engine = Flatperm::new([4], 1.0).unwrap();
        let control = RunControl::new();
        control.request_checkpoint();
        let mut seen = Vec::new();
        let report = engine
            .run_with(&mut Tree::new(2), 3, &mut rng(), &control, |engine, tree| {
                seen.push((engine.tours(), tree.depth));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, 0)]);
        assert_eq!(report.checkpoints, 1);
        assert!(!control.take_checkpoint_request());
    }

    #[test]
    fn checkpoint_failure_aborts_the_run() {
        let mut engine = Flatperm::new([4], 1.0).unwrap();
        let control = RunControl::new();
        control.request_checkpoint();
        let result = engine.run_with(&mut Tree::new(2), 3, &mut rng(), &control, |_, _| {
            Err(StoreError::MissingArray("sW".into()).into())
        });
        assert!(matches!(result, Err(FlatpermError::Store(_))));
    }

    #[test]
    fn tour_from_non_empty_state_is_rejected() {
        let mut engine = Flatperm::new([4], 1.0).unwrap();
        let mut tree = Tree::new(2);
        tree.depth = 2;
        let err = engine.run(&mut tree, 1, &mut rng()).unwrap_err();
        assert!(err.is_fatal());
    }

    // ── persistence ──

    #[test]
    fn save_then_load_restores_histograms() {
        let mut engine = Flatperm::new([5], 1.0).unwrap();
        engine.run(&mut Tree::new(2), 20, &mut rng()).unwrap();

        let mut store = MemoryStore::new();
        engine.save(&mut store).unwrap();

        let mut back = Flatperm::new([5], 1.0).unwrap();
        back.load(&store).unwrap();
        assert_eq!(back.tours(), 20);
        assert_eq!(back.sw, engine.sw);
        assert_eq!(back.pru, engine.pru);

        let mut wrong = Flatperm::new([6], 1.0).unwrap();
        assert!(matches!(wrong.load(&store), Err(FlatpermError::Store(_))));
    }
}
