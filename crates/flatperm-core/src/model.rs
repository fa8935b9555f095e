//! [`SawModel`]: binds the engine to a walk and its observables.
//!
//! The classification index is `[length, m₂]` where `m₂` is the number of
//! sites the walk has arrived at exactly twice. Alongside the engine's
//! histograms the model accumulates weighted sums of three size measures
//! at each index:
//!
//! | Array  | Quantity                                     |
//! |--------|----------------------------------------------|
//! | `Re2W` | `W · |tip|²` (end-to-end distance)           |
//! | `Rg2W` | `W · (C/n − |B|²/n²)` (radius of gyration)   |
//! | `Rm2W` | `W · C/n` (mean-square distance from origin) |
//!
//! Squared lengths are Euclidean, measured with [`Lattice::norm_square`]
//! (`x² − xy + y²` on the triangular lattice). Files written by earlier
//! tools that squared the raw coordinates (`x² + y²`) hold different values
//! in these three arrays.
//!
//! and keeps, per `m₂` bucket, the heaviest full-length walk seen so far.

use std::time::{SystemTime, UNIX_EPOCH};

use flatperm_lattice::{Lattice, Point};
use tracing::debug;

use crate::engine::{Flatperm, Model};
use crate::error::{FlatpermError, Result};
use crate::histogram::Histogram;
use crate::observables::{Multiplicity, Radius};
use crate::store::{ArrayStore, AttrValue, StoreError};
use crate::walk::Walk;

/// Value of the `TITLE` attribute.
pub const TITLE: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// Number of indices the model classifies by.
pub const INDICES: usize = 2;

#[derive(Debug, Clone)]
pub struct SawModel<L: Lattice> {
    max_length: usize,
    mu: f64,

    walk: Walk<L>,
    radius: Radius<L>,
    multiplicity: Multiplicity<L>,
    index: [usize; INDICES],
    samples: u64,

    pub re2w: Histogram<f64, INDICES>,
    pub rg2w: Histogram<f64, INDICES>,
    pub rm2w: Histogram<f64, INDICES>,
    /// Weight of the best full-length walk per `m₂` bucket.
    pub sampled_weights: Histogram<f64, 1>,
    /// Coordinates of those walks, `[m₂, point, axis]`.
    pub sampled_walks: Histogram<i32, 3>,
}

impl<L: Lattice> SawModel<L> {
    /// Empty walk with room for `max_length` steps.
    pub fn new(max_length: usize, mu: f64) -> Self {
        let extents = Self::extents_for(max_length);
        Self {
            max_length,
            mu,
            walk: Walk::new(max_length),
            radius: Radius::new(),
            multiplicity: Multiplicity::new(),
            index: [0; INDICES],
            samples: 0,
            re2w: Histogram::new(extents),
            rg2w: Histogram::new(extents),
            rm2w: Histogram::new(extents),
            sampled_weights: Histogram::new([extents[1]]),
            sampled_walks: Histogram::new([extents[1], extents[0], 2]),
        }
    }

    /// Index extents for walks of up to `max_length` steps: every length
    /// `0..=N` and every `m₂` in `0..=N/2`.
    pub fn extents_for(max_length: usize) -> [usize; INDICES] {
        [max_length + 1, max_length / 2 + 1]
    }

    pub fn extents(&self) -> [usize; INDICES] {
        Self::extents_for(self.max_length)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn walk(&self) -> &Walk<L> {
        &self.walk
    }

    pub fn radius(&self) -> &Radius<L> {
        &self.radius
    }

    pub fn multiplicity(&self) -> &Multiplicity<L> {
        &self.multiplicity
    }

    /// Steps registered since creation (or since the loaded checkpoint).
    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn refresh_index(&mut self) {
        self.index = [self.walk.len(), self.multiplicity.bucket(2) as usize];
    }

    fn keep_if_heavier(&mut self, weight: f64) {
        let m = self.index[1];
        if weight > self.sampled_weights[[m]] {
            self.sampled_weights[[m]] = weight;
            for (i, p) in self.walk.points().iter().enumerate() {
                self.sampled_walks.row_mut(&[m, i]).copy_from_slice(&[p.x, p.y]);
            }
        }
    }

    // ── Persistence ─────────────────────────────────

    /// `(N, mu)` recorded in a store written by [`SawModel::save`].
    pub fn read_parameters<S: ArrayStore + ?Sized>(store: &S) -> Result<(usize, f64)> {
        let n = store.read_attr("N")?;
        let mu = store.read_attr("mu")?;
        match (n.as_u64(), mu.as_f64()) {
            (Some(n), Some(mu)) => Ok((n as usize, mu)),
            _ => Err(FlatpermError::Configuration(format!(
                "stored parameters have unexpected types: N = {n:?}, mu = {mu:?}"
            ))),
        }
    }

    /// Write the run parameters, the engine histograms and every model array.
    pub fn save<S: ArrayStore + ?Sized>(&self, engine: &Flatperm<INDICES>, store: &mut S) -> Result<()> {
        store.write_attr("TITLE", AttrValue::Text(TITLE.to_string()))?;
        store.write_attr("lattice", AttrValue::Text(L::NAME.to_string()))?;
        store.write_attr("N", AttrValue::UInt(self.max_length as u64))?;
        store.write_attr("mu", AttrValue::Float(self.mu))?;

        engine.save(store)?;

        self.re2w.save(store, "Re2W")?;
        self.rg2w.save(store, "Rg2W")?;
        self.rm2w.save(store, "Rm2W")?;

        let saved_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        store.write_attr("saved_at", AttrValue::UInt(saved_at))?;
        store.write_attr("samples", AttrValue::UInt(self.samples))?;

        self.sampled_walks.save(store, "sampled_walks")?;
        self.sampled_weights.save(store, "sampled_weights")?;
        debug!(samples = self.samples, saved_at, "saved model arrays");
        Ok(())
    }

    /// Reload the model arrays. The model must have been built with the
    /// stored `N`. A missing `samples` attribute counts as zero.
    pub fn load<S: ArrayStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.re2w.load(store, "Re2W")?;
        self.rg2w.load(store, "Rg2W")?;
        self.rm2w.load(store, "Rm2W")?;
        self.sampled_walks.load(store, "sampled_walks")?;
        self.sampled_weights.load(store, "sampled_weights")?;
        self.samples = match store.read_attr("samples") {
            Ok(value) => value.as_u64().ok_or_else(|| {
                FlatpermError::Configuration(format!(
                    "stored samples attribute has unexpected type: {value:?}"
                ))
            })?,
            Err(StoreError::MissingAttr(_)) => 0,
            Err(e) => return Err(e.into()),
        };
        debug!(samples = self.samples, "loaded model arrays");
        Ok(())
    }
}

impl<L: Lattice> Model<INDICES> for SawModel<L> {
    type Point = Point;

    fn atmosphere(&self) -> Result<Vec<Point>> {
        self.walk.atmosphere()
    }

    fn register_step(&mut self, point: Point, weight: f64) -> Result<()> {
        // Walk and multiplicity both reject before mutating; undo the walk
        // step so a failed registration leaves the model unchanged.
        self.walk.register_step(point)?;
        if let Err(e) = self.multiplicity.register_step(point) {
            self.walk.unregister_step()?;
            return Err(e);
        }
        self.radius.register_step(point);
        self.samples += 1;
        self.refresh_index();

        let n = self.walk.len();
        let re2 = L::point_norm_square(point) as f64;
        let rg2 = self.radius.gyration_square(n);
        let rm2 = self.radius.mean_square(n);

        self.re2w[self.index] += weight * re2;
        self.rg2w[self.index] += weight * rg2;
        self.rm2w[self.index] += weight * rm2;

        if n == self.max_length {
            self.keep_if_heavier(weight);
        }
        Ok(())
    }

    fn unregister_step(&mut self) -> Result<()> {
        let tip = self.walk.tip();
        if self.walk.is_empty() {
            return Err(FlatpermError::corrupt(tip, "unregister on an empty walk"));
        }
        self.multiplicity.unregister_step(tip)?;
        self.radius.unregister_step(tip);
        self.walk.unregister_step()?;
        self.refresh_index();
        Ok(())
    }

    fn index(&self) -> [usize; INDICES] {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::store::MemoryStore;
    use flatperm_lattice::Triangular;

    type TriModel = SawModel<Triangular>;

    fn p(x: i32, y: i32) -> Point {
        Point::new(x, y)
    }

    fn register_all(model: &mut TriModel, steps: &[(i32, i32)], weight: f64) {
        for &(x, y) in steps {
            model.register_step(p(x, y), weight).unwrap();
        }
    }

    // Triangle back to the origin, then round to (1,0) a second time.
    const DOUBLE_VISIT: [(i32, i32); 5] = [(1, 0), (1, 1), (0, 0), (0, -1), (1, 0)];

    #[test]
    fn extents_cover_length_and_double_visits() {
        let model = TriModel::new(7, 1.0);
        assert_eq!(model.extents(), [8, 4]);
        assert_eq!(model.sampled_walks.extents(), [4, 8, 2]);
        assert_eq!(model.sampled_weights.extents(), [4]);
    }

    #[test]
    fn index_tracks_length_and_second_arrivals() {
        let mut model = TriModel::new(8, 1.0);
        register_all(&mut model, &DOUBLE_VISIT[..4], 1.0);
        assert_eq!(model.index(), [4, 0]);
        model.register_step(p(1, 0), 2.0).unwrap();
        assert_eq!(model.index(), [5, 1]);
        // |(1,0)|² = 1
        assert_eq!(model.re2w[[5, 1]], 2.0);
        assert_eq!(model.samples(), 5);
    }

    #[test]
    fn size_measures_are_weighted() {
        let mut model = TriModel::new(4, 1.0);
        register_all(&mut model, &[(1, 0), (2, 0)], 3.0);
        // n = 2: C = 5, |B|² = 9.
        assert_eq!(model.re2w[[2, 0]], 3.0 * 4.0);
        assert!((model.rm2w[[2, 0]] - 3.0 * 2.5).abs() < 1e-12);
        assert!((model.rg2w[[2, 0]] - 3.0 * 0.25).abs() < 1e-12);
        assert_eq!(model.rg2w[[1, 0]], 0.0);
    }

    #[test]
    fn unregister_restores_walk_and_trackers() {
        let mut model = TriModel::new(8, 1.0);
        let empty = TriModel::new(8, 1.0);
        register_all(&mut model, &DOUBLE_VISIT, 1.0);
        for _ in 0..DOUBLE_VISIT.len() {
            model.unregister_step().unwrap();
        }
        assert_eq!(model.index(), [0, 0]);
        assert_eq!(model.walk(), empty.walk());
        assert_eq!(model.radius(), empty.radius());
        assert_eq!(model.multiplicity(), empty.multiplicity());
        // Accumulators are not undone.
        assert!(model.re2w.as_slice().iter().any(|&x| x > 0.0));
    }

    #[test]
    fn unregister_on_empty_walk_is_corrupt_state() {
        let mut model = TriModel::new(3, 1.0);
        assert!(matches!(model.unregister_step(), Err(FlatpermError::CorruptState { .. })));
    }

    #[test]
    fn best_sample_is_replaced_only_by_heavier_walks() {
        let mut model = TriModel::new(2, 1.0);
        register_all(&mut model, &[(1, 0)], 1.0);
        model.register_step(p(2, 0), 5.0).unwrap();
        assert_eq!(model.sampled_weights[[0]], 5.0);
        assert_eq!(model.sampled_walks.row(&[0, 2]), &[2, 0]);

        model.unregister_step().unwrap();
        model.register_step(p(1, 1), 5.0).unwrap();
        assert_eq!(model.sampled_walks.row(&[0, 2]), &[2, 0]);

        model.unregister_step().unwrap();
        model.register_step(p(1, 1), 6.0).unwrap();
        assert_eq!(model.sampled_weights[[0]], 6.0);
        assert_eq!(model.sampled_walks.row(&[0, 0]), &[0, 0]);
        assert_eq!(model.sampled_walks.row(&[0, 1]), &[1, 0]);
        assert_eq!(model.sampled_walks.row(&[0, 2]), &[1, 1]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut model = TriModel::new(6, 1.5);
        let mut engine = Flatperm::new(model.extents(), model.mu()).unwrap();
        engine.run(&mut model, 30, &mut StdRng::seed_from_u64(3)).unwrap();

        let mut store = MemoryStore::new();
        model.save(&engine, &mut store).unwrap();
        assert_eq!(store.read_attr("TITLE").unwrap().as_str(), Some(TITLE));
        assert_eq!(store.read_attr("lattice").unwrap().as_str(), Some("triangular"));

        let (n, mu) = TriModel::read_parameters(&store).unwrap();
        assert_eq!((n, mu), (6, 1.5));

        let mut back = TriModel::new(n, mu);
        back.load(&store).unwrap();
        assert_eq!(back.re2w, model.re2w);
        assert_eq!(back.rg2w, model.rg2w);
        assert_eq!(back.rm2w, model.rm2w);
        assert_eq!(back.sampled_walks, model.sampled_walks);
        assert_eq!(back.sampled_weights, model.sampled_weights);
        assert_eq!(back.samples(), model.samples());
    }

    #[test]
    fn failed_registration_leaves_the_model_unchanged() {
        // Three arrivals at the origin, then a fourth.
        #[rustfmt::skip]
        const LOOPS: [(i32, i32); 11] = [
            (1, 0), (1, 1), (0, 0),
            (0, 1), (-1, 0), (0, 0),
            (0, -1), (1, 0), (0, 0),
            (-1, -1), (-1, 0),
        ];
        let mut model = TriModel::new(12, 1.0);
        register_all(&mut model, &LOOPS, 1.0);
        assert_eq!(model.index(), [11, 2]);
        let (walk, radius, multiplicity) =
            (model.walk().clone(), model.radius().clone(), model.multiplicity().clone());

        let err = model.register_step(p(0, 0), 1.0).unwrap_err();
        assert!(matches!(err, FlatpermError::CorruptState { .. }));
        assert_eq!(model.walk(), &walk);
        assert_eq!(model.radius(), &radius);
        assert_eq!(model.multiplicity(), &multiplicity);
        assert_eq!(model.index(), [11, 2]);
        assert_eq!(model.samples(), 11);

        for _ in 0..LOOPS.len() {
            model.unregister_step().unwrap();
        }
        assert_eq!(model.index(), [0, 0]);
    }

    #[test]
    fn samples_attribute_must_be_an_integer() {
        let mut model = TriModel::new(4, 1.0);
        let engine = Flatperm::new(model.extents(), model.mu()).unwrap();
        let mut store = MemoryStore::new();
        model.save(&engine, &mut store).unwrap();

        store.write_attr("samples", AttrValue::Text("many".into())).unwrap();
        assert!(matches!(model.load(&store), Err(FlatpermError::Configuration(_))));

        let mut without = MemoryStore::new();
        for name in ["Re2W", "Rg2W", "Rm2W", "sampled_walks", "sampled_weights"] {
            without.write_array(name, store.read_array(name).unwrap()).unwrap();
        }
        model.load(&without).unwrap();
        assert_eq!(model.samples(), 0);
    }

    #[test]
    fn parameters_with_wrong_types_are_rejected() {
        let mut store = MemoryStore::new();
        store.write_attr("N", AttrValue::Text("six".into())).unwrap();
        store.write_attr("mu", AttrValue::Float(1.0)).unwrap();
        assert!(matches!(
            TriModel::read_parameters(&store),
            Err(FlatpermError::Configuration(_))
        ));
    }
}
