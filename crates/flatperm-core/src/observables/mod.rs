//! Incremental observables that follow the walk step by step.
//!
//! Both trackers are updated with the tip point: `register_step` right after
//! the walk appends it, `unregister_step` right before the walk drops it.
//! Used that way they stay exactly consistent under backtracking.

pub mod multiplicity;
pub mod radius;

pub use multiplicity::Multiplicity;
pub use radius::Radius;
