use flatperm_lattice::{LatticeError, Point};
use thiserror::Error;

use crate::store::StoreError;

/// Every failure the sampler can report.
///
/// `CorruptState`, `CorruptHistory` and `UnclassifiableStep` mean the walk
/// or engine invariants are already broken; callers must abort the run
/// rather than retry.
#[derive(Debug, Error)]
pub enum FlatpermError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("corrupt walk state at site ({site}): {detail}")]
    CorruptState { site: Point, detail: String },

    #[error("corrupt branch history: {0}")]
    CorruptHistory(String),

    #[error("unclassifiable step: {0}")]
    UnclassifiableStep(#[from] LatticeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl FlatpermError {
    pub(crate) fn corrupt(site: Point, detail: impl Into<String>) -> Self {
        Self::CorruptState { site, detail: detail.into() }
    }

    /// `true` for errors that indicate broken walk invariants.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CorruptState { .. } | Self::CorruptHistory(_) | Self::UnclassifiableStep(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlatpermError>;
