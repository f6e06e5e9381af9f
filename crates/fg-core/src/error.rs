//! Error types for fitgraph

use thiserror::Error;

/// fitgraph error type
#[derive(Error, Debug)]
pub enum Error {
    /// A registration call received a handle that no longer names a live variable.
    #[error("null argument: {0}")]
    NullArgument(String),

    /// The fixed-capacity slot space would overflow.
    #[error("capacity exceeded: {what} would need {requested} slots, only {capacity} available")]
    CapacityExceeded {
        /// Which region overflowed (parameters, constants, indices).
        what: &'static str,
        /// Slots the request would have required in total.
        requested: usize,
        /// Fixed capacity of the slot space.
        capacity: usize,
    },

    /// Event or variable index beyond the stored bounds.
    #[error("index out of range: {what} index {index} >= {len}")]
    IndexOutOfRange {
        /// What was being indexed.
        what: String,
        /// Requested index.
        index: usize,
        /// Number of stored elements.
        len: usize,
    },

    /// One or more model nodes report that they were not properly initialised.
    #[error("misconfigured model nodes: {}", .0.join(", "))]
    Misconfiguration(Vec<String>),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
