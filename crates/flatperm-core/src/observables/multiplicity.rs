//! Histogram of how often sites have been arrived at.

use std::collections::HashMap;
use std::marker::PhantomData;

use flatperm_lattice::{Lattice, Point};

use crate::error::{FlatpermError, Result};

/// Arrival counts per site and the number of sites in each count bucket.
///
/// `bucket(k)` is the number of sites the walk has stepped onto exactly `k`
/// times. The starting visit of the origin is not an arrival. A site can be
/// passed through at most `COORDINATION / 2` times without reusing an edge,
/// which bounds `k`. Bucket 0 would count every unvisited site and stays 0.
///
/// `Σ k · bucket(k)` always equals the walk length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiplicity<L: Lattice> {
    counts: HashMap<Point, u32>,
    buckets: Vec<u32>,
    _lattice: PhantomData<L>,
}

impl<L: Lattice> Default for Multiplicity<L> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            buckets: vec![0; L::COORDINATION / 2 + 1],
            _lattice: PhantomData,
        }
    }
}

impl<L: Lattice> Multiplicity<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sites arrived at exactly `k` times (0 past the last bucket).
    #[inline]
    pub fn bucket(&self, k: usize) -> u32 {
        self.buckets.get(k).copied().unwrap_or(0)
    }

    pub fn buckets(&self) -> &[u32] {
        &self.buckets
    }

    /// Arrivals recorded at `site`.
    pub fn count(&self, site: Point) -> u32 {
        self.counts.get(&site).copied().unwrap_or(0)
    }

    /// `Σ k · bucket(k)`.
    pub fn arrivals(&self) -> u64 {
        self.buckets.iter().enumerate().map(|(k, &m)| k as u64 * u64::from(m)).sum()
    }

    pub fn register_step(&mut self, tip: Point) -> Result<()> {
        let count = self.counts.entry(tip).or_insert(0);
        let k = *count as usize + 1;
        if k >= self.buckets.len() {
            return Err(FlatpermError::corrupt(
                tip,
                format!("arrival {k} exceeds the lattice limit of {}", self.buckets.len() - 1),
            ));
        }
        *count += 1;
        if k > 1 {
            self.buckets[k - 1] -= 1;
        }
        self.buckets[k] += 1;
        Ok(())
    }

    /// Inverse of [`Multiplicity::register_step`] for the same tip.
    ///
    /// # Errors
    ///
    /// [`FlatpermError::CorruptState`] if `tip` has no recorded arrival.
    pub fn unregister_step(&mut self, tip: Point) -> Result<()> {
        let Some(count) = self.counts.get_mut(&tip) else {
            return Err(FlatpermError::corrupt(tip, "site missing from the multiplicity multiset"));
        };
        let k = *count as usize;
        self.buckets[k] -= 1;
        if k > 1 {
            self.buckets[k - 1] += 1;
        }
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&tip);
        }
        Ok(())
    }
}
