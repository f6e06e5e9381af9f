//! # fg-core
//!
//! Core types, traits, and error handling for fitgraph.
//!
//! This crate provides:
//! - Common error types
//! - [`Variable`] and the generation-checked [`VariableArena`]
//! - The fixed-capacity [`SlotArrays`] read by the evaluation layer
//! - Seams to external layers ([`DataSet`], [`EvaluationBackend`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod slots;
pub mod traits;
pub mod types;
pub mod variable;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use slots::SlotArrays;
pub use traits::{DataSet, EvaluationBackend};
pub use types::FitResult;
pub use variable::{VarId, Variable, VariableArena};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
