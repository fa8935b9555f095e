//! # flatperm-lattice
//!
//! Lattice geometry for the flatPERM walk sampler.
//!
//! The walk and the observables never hard-code a lattice: they are generic
//! over the [`Lattice`] capability, which bundles everything geometric the
//! sampler needs to know.
//!
//! | Item | Purpose |
//! |---|---|
//! | [`Lattice::DIRECTIONS`] | Unit steps in canonical cyclic order (the direction codes) |
//! | [`Lattice::NEIGHBOUR_STEPS`] | Unit steps in neighbour-enumeration order |
//! | [`Lattice::segment_code`] | Directed unit step → direction index |
//! | [`Lattice::neighbours`] | Adjacent points, deterministic order |
//! | [`Lattice::norm_square`] | Squared Euclidean length of a lattice vector |
//!
//! Only the [`Triangular`] lattice is provided.

pub mod error;
pub mod point;
pub mod triangular;

pub use error::LatticeError;
pub use point::Point;
pub use triangular::Triangular;

/// Geometry of a regular 2-D lattice.
///
/// Implementors only supply the step tables and the metric; everything else
/// has a default implementation derived from them.
pub trait Lattice {
    /// Unit steps ordered cyclically around a site. The index of a step in
    /// this table is its direction code.
    const DIRECTIONS: &'static [Point];

    /// Unit steps in the order [`Lattice::neighbours`] visits them.
    ///
    /// Kept separate from [`Lattice::DIRECTIONS`] because the pre-shuffle
    /// atmosphere order is part of a seeded run's reproducibility.
    const NEIGHBOUR_STEPS: &'static [Point];

    /// Number of nearest neighbours of every site.
    const COORDINATION: usize = Self::DIRECTIONS.len();

    /// Human-readable lattice name, written into stored datasets.
    const NAME: &'static str;

    /// The site every walk starts from.
    fn origin() -> Point {
        Point::ZERO
    }

    /// Direction code of the unit step `from → to`.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::UnclassifiableStep`] if `to − from` is not one
    /// of [`Lattice::DIRECTIONS`].
    fn segment_code(from: Point, to: Point) -> Result<u8, LatticeError> {
        let delta = to - from;
        Self::DIRECTIONS
            .iter()
            .position(|&d| d == delta)
            .map(|i| i as u8)
            .ok_or(LatticeError::UnclassifiableStep { from, to, delta })
    }

    /// The [`Lattice::COORDINATION`] sites adjacent to `p`.
    fn neighbours(p: Point) -> Vec<Point> {
        Self::NEIGHBOUR_STEPS.iter().map(|&s| p + s).collect()
    }

    /// Squared Euclidean length of the lattice vector with basis
    /// coordinates `(x, y)`.
    fn norm_square(x: i64, y: i64) -> i64;

    /// Squared Euclidean distance of `p` from the origin.
    fn point_norm_square(p: Point) -> i64 {
        let (x, y) = p.widen();
        Self::norm_square(x, y)
    }
}
