use thiserror::Error;

/// Errors surfaced by the solver. Recoverable backpressure (a full upload
/// queue) is not an error; it shows up as `Ok(None)` from `add_particle`.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("id pool exhausted at capacity {capacity}")]
    PoolExhausted { capacity: u32 },

    #[error("id {id} is outside the valid range 0..{limit}")]
    InvalidReference { id: u32, limit: u32 },

    #[error("cannot remove a particle from an empty store")]
    EmptyStoreRemoval,

    #[error("{what} cannot shrink from {current} to {requested}")]
    ShrinkUnsupported {
        what: &'static str,
        current: usize,
        requested: usize,
    },

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting {
        name: &'static str,
        reason: String,
    },

    #[error("failed to start compute workers: {0}")]
    Device(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, SimError>;
