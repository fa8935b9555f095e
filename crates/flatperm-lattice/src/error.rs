//! Error types for lattice geometry.

use crate::point::Point;

/// Errors raised by lattice geometry queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LatticeError {
    /// Two consecutive walk points are not joined by a lattice unit vector.
    #[error("step {from} -> {to} is not a lattice unit step (delta {delta})")]
    UnclassifiableStep { from: Point, to: Point, delta: Point },
}
