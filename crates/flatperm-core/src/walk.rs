//! Self-avoiding walk with an edge-crossing ledger.
//!
//! The walk may revisit a site, but it may never cross itself there. Every
//! time the walk passes through a site `y` (arriving from `x`, leaving to
//! `z`) the pair of direction codes `(j, k)` of the two incident edges is
//! recorded in the *cut ledger* at `y`. Direction codes follow the cyclic
//! order of the lattice, so a pair splits the directions around `y` into two
//! arcs. A later passage through `y` is legal only if its pair lies strictly
//! inside or strictly outside every recorded pair:
//!
//! ```text
//!   recorded (1,4), candidate (2,3)  → nested, allowed
//!   recorded (1,2), candidate (3,5)  → disjoint, allowed
//!   recorded (1,4), candidate (0,2)  → crossing, rejected
//!   recorded (1,4), candidate (1,4)  → edge reuse, rejected
//! ```
//!
//! Register and unregister are exact inverses, so backtracking restores the
//! ledger entry by entry.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use flatperm_lattice::{Lattice, Point};

use crate::error::{FlatpermError, Result};

/// Ordered direction pair `(low, high)` of the two edges through a site.
pub type Cut = (u8, u8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk<L: Lattice> {
    points: Vec<Point>,
    cuts: HashMap<Point, Vec<Cut>>,
    _lattice: PhantomData<L>,
}

impl<L: Lattice> Default for Walk<L> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<L: Lattice> Walk<L> {
    /// Empty walk sitting at the origin, with room for `capacity` steps.
    pub fn new(capacity: usize) -> Self {
        let mut points = Vec::with_capacity(capacity + 1);
        points.push(L::origin());
        Self { points, cuts: HashMap::new(), _lattice: PhantomData }
    }

    /// Number of steps (points − 1).
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.len() == 1
    }

    #[inline]
    pub fn tip(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    /// Every visited point, origin first.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Cuts recorded at `site`, in registration order.
    pub fn cuts_at(&self, site: Point) -> &[Cut] {
        self.cuts.get(&site).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direction pair of the passage `x → y → z` through `y`, low code first.
    fn cut(x: Point, y: Point, z: Point) -> Result<Cut> {
        let j = L::segment_code(y, z)?;
        let k = L::segment_code(y, x)?;
        Ok(if j <= k { (j, k) } else { (k, j) })
    }

    /// `true` if appending `z` keeps the walk valid.
    ///
    /// Non-neighbours of the tip are reported as
    /// [`FlatpermError::UnclassifiableStep`].
    pub fn check_step(&self, z: Point) -> Result<bool> {
        let n = self.points.len();
        let y = self.points[n - 1];

        // Back at the origin: the first edge is not in the ledger, so forbid
        // walking it a second time explicitly.
        if n >= 2 && y == L::origin() && z == self.points[1] {
            return Ok(false);
        }

        if n < 2 {
            L::segment_code(y, z)?;
            return Ok(true);
        }

        let x = self.points[n - 2];
        let (j, k) = Self::cut(x, y, z)?;
        if j == k {
            return Ok(false);
        }

        Ok(self.cuts_at(y).iter().all(|&recorded| non_crossing(recorded, (j, k))))
    }

    /// Tip neighbours that pass [`Walk::check_step`], in lattice neighbour order.
    pub fn atmosphere(&self) -> Result<Vec<Point>> {
        let mut atmosphere = Vec::with_capacity(L::COORDINATION);
        for z in L::neighbours(self.tip()) {
            if self.check_step(z)? {
                atmosphere.push(z);
            }
        }
        Ok(atmosphere)
    }

    /// Append `z`. The caller is expected to have checked it.
    pub fn register_step(&mut self, z: Point) -> Result<()> {
        let n = self.points.len();
        if n >= 2 {
            let y = self.points[n - 1];
            let x = self.points[n - 2];
            let cut = Self::cut(x, y, z)?;
            self.cuts.entry(y).or_default().push(cut);
        } else {
            L::segment_code(self.points[0], z)?;
        }
        self.points.push(z);
        Ok(())
    }

    /// Remove the tip, erasing the cut its arrival recorded.
    ///
    /// # Errors
    ///
    /// [`FlatpermError::CorruptState`] if the walk is already empty or the
    /// expected cut is missing from the ledger.
    pub fn unregister_step(&mut self) -> Result<()> {
        let n = self.points.len();
        if n < 2 {
            return Err(FlatpermError::corrupt(self.tip(), "unregister on an empty walk"));
        }
        if n >= 3 {
            let z = self.points[n - 1];
            let y = self.points[n - 2];
            let x = self.points[n - 3];
            let cut = Self::cut(x, y, z)?;

            let missing = || FlatpermError::corrupt(y, format!("cut {cut:?} was never recorded"));
            let cuts_y = self.cuts.get_mut(&y).ok_or_else(missing)?;
            let pos = cuts_y.iter().position(|&c| c == cut).ok_or_else(missing)?;
            cuts_y.remove(pos);
            if cuts_y.is_empty() {
                self.cuts.remove(&y);
            }
        }
        self.points.pop();
        Ok(())
    }
}

/// Two passages through a site are compatible when their direction pairs
/// share no direction and their chords do not interleave around the site:
/// one strictly nests inside the other, or they are strictly disjoint.
#[inline]
fn non_crossing((a, b): Cut, (j, k): Cut) -> bool {
    (a < j && k < b) || (j < a && b < k) || b < j || k < a
}

impl<L: Lattice> fmt::Display for Walk<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}
