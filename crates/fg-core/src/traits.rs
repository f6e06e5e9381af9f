//! Core traits for fitgraph
//!
//! These are the seams to the layers this workspace does not implement:
//! datasets are consumed by the evaluation layer, and the evaluation layer
//! itself is reached only through [`EvaluationBackend`].

use crate::Result;
use crate::slots::SlotArrays;
use crate::variable::VarId;

/// A dataset that can be bound to a model for fitting.
pub trait DataSet {
    /// Dataset name.
    fn name(&self) -> &str;

    /// Bound variables, in binding order.
    fn variables(&self) -> &[VarId];

    /// Number of stored events.
    fn n_events(&self) -> usize;
}

/// The parallel evaluation layer, seen from the host.
///
/// Implementations read parameter values and index metadata from the slot
/// arrays and must not write to them.
pub trait EvaluationBackend {
    /// Negative log-likelihood of `data` under the current slot contents.
    fn nll(&self, slots: &SlotArrays, data: &dyn DataSet) -> Result<f64>;

    /// Backend name (e.g., "CPU", "CUDA")
    fn name(&self) -> &str;
}
