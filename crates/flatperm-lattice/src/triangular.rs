//! The triangular lattice.
//!
//! Sites are integer combinations `x·a + y·b` of two unit basis vectors at
//! 120° to each other:
//!
//! ```text
//!            (0,1)   (1,1)
//!               \   /
//!      (-1,0) ── (0,0) ── (1,0)
//!               /   \
//!         (-1,-1)   (0,-1)
//! ```
//!
//! With `a = (1, 0)` and `b = (−½, √3⁄2)` in the plane, every one of the six
//! unit steps has length 1 and the squared length of `x·a + y·b` is the
//! integer `x² − xy + y²`.

use crate::{Lattice, Point};

/// Six-coordinated planar lattice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Triangular;

impl Lattice for Triangular {
    // Clockwise, 60° apart: 180°, 120°, 60°, 0°, 300°, 240°.
    const DIRECTIONS: &'static [Point] = &[
        Point::new(-1, 0),
        Point::new(0, 1),
        Point::new(1, 1),
        Point::new(1, 0),
        Point::new(0, -1),
        Point::new(-1, -1),
    ];

    const NEIGHBOUR_STEPS: &'static [Point] = &[
        Point::new(1, 0),
        Point::new(-1, 0),
        Point::new(0, 1),
        Point::new(0, -1),
        Point::new(1, 1),
        Point::new(-1, -1),
    ];

    const NAME: &'static str = "triangular";

    #[inline]
    fn norm_square(x: i64, y: i64) -> i64 {
        x * x - x * y + y * y
    }
}
