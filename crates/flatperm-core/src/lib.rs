//! # flatperm-core
//!
//! Flat-histogram PERM (flatPERM) sampling of self-avoiding walks.
//!
//! Walks are grown one step at a time from the origin. At every length the
//! engine compares the weight of the growing walk with the running average
//! at its classification index and prunes light walks or enriches heavy ones,
//! so every index is visited about equally often. The summed weights then
//! estimate the number of walks of each class, and the weighted size
//! measures estimate their mean end-to-end distance and radii.
//!
//! ## Layers
//!
//! | Module | Purpose |
//! |---|---|
//! | [`walk`] | Walk with an edge-crossing ledger: vertex revisits allowed, crossings not |
//! | [`observables`] | Incremental position moments and revisit multiplicities |
//! | [`histogram`] | Dense arrays addressed by the classification index |
//! | [`engine`] | The generic flatPERM growth engine and its [`Model`] contract |
//! | [`model`] | [`SawModel`]: walk + observables as an engine model |
//! | [`simulation`] | Engine, model and seeded random source together |
//! | [`store`] | Keyed array store, in memory or as one checksummed file |
//!
//! ## Example
//!
//! ```no_run
//! use flatperm_core::{RunControl, Simulation};
//!
//! let mut sim: Simulation = Simulation::new(20, 1.0, 1)?;
//! sim.run(1_000, &RunControl::new(), |_, _| Ok(()))?;
//! println!("{} tours", sim.tours());
//! # Ok::<(), flatperm_core::FlatpermError>(())
//! ```

pub mod engine;
pub mod error;
pub mod histogram;
pub mod model;
pub mod observables;
pub mod simulation;
pub mod store;
pub mod walk;

pub use engine::{Flatperm, Model, RunControl, RunReport, Strategy};
pub use error::{FlatpermError, Result};
pub use histogram::Histogram;
pub use model::SawModel;
pub use simulation::{RunStats, Simulation, StatsBaseline};
pub use store::{ArrayStore, AttrValue, FileStore, MemoryStore, StoreError};
pub use walk::Walk;

pub use flatperm_lattice::{Lattice, Point, Triangular};
