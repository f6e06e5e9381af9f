//! # fg-model
//!
//! Composite model graph and parameter registry for fitgraph.
//!
//! This crate provides:
//! - [`ParameterRegistry`]: slot allocation for parameters, the constants
//!   cursor and the arrays read by the evaluation layer.
//! - [`ModelNode`]: a node of the composite model DAG.
//! - [`Session`]: the explicit context that owns variables, nodes and the
//!   registry, and implements every graph operation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnostics;
pub mod node;
pub mod registry;
pub mod session;

pub use diagnostics::DiagnosticDump;
pub use node::{DataBinding, ModelNode, NodeId};
pub use registry::{FIRST_CONSTANT, ParameterRegistry};
pub use session::Session;

#[cfg(test)]
mod tests;
