//! Running moments of the visited points.

use std::marker::PhantomData;

use flatperm_lattice::{Lattice, Point};

/// Exact integer sums over every point the walk has arrived at:
/// `B = Σ p` and `C = Σ |p|²`.
///
/// The origin contributes nothing to either sum, so the sums over the
/// arrivals equal the sums over the whole walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Radius<L: Lattice> {
    b: (i64, i64),
    c: i64,
    _lattice: PhantomData<L>,
}

impl<L: Lattice> Default for Radius<L> {
    fn default() -> Self {
        Self { b: (0, 0), c: 0, _lattice: PhantomData }
    }
}

impl<L: Lattice> Radius<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_step(&mut self, tip: Point) {
        let (x, y) = tip.widen();
        self.b.0 += x;
        self.b.1 += y;
        self.c += L::norm_square(x, y);
    }

    pub fn unregister_step(&mut self, tip: Point) {
        let (x, y) = tip.widen();
        self.b.0 -= x;
        self.b.1 -= y;
        self.c -= L::norm_square(x, y);
    }

    /// `|B|²`, the squared length of the position sum.
    #[inline]
    pub fn cm_norm_square(&self) -> i64 {
        L::norm_square(self.b.0, self.b.1)
    }

    /// `C`, the sum of squared lengths.
    #[inline]
    pub fn norm_square_sum(&self) -> i64 {
        self.c
    }

    /// Squared radius of gyration `C/n − |B|²/n²` of an `n`-step walk.
    pub fn gyration_square(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        self.c as f64 / n - self.cm_norm_square() as f64 / (n * n)
    }

    /// Mean squared distance from the origin `C/n` of an `n`-step walk.
    pub fn mean_square(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        self.c as f64 / n as f64
    }
}
