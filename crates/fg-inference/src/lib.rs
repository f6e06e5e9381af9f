//! # fg-inference
//!
//! Fit entry point for fitgraph.
//!
//! This crate provides:
//! - The [`Minimizer`] seam and an argmin-backed [`LbfgsbOptimizer`]
//! - [`FitManager`] / [`fit_to`]: bind a dataset to a model subtree, run the
//!   minimizer against an [`fg_core::EvaluationBackend`] and collect a
//!   [`fg_core::FitResult`]

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Fit entry point and Hessian-based uncertainties.
pub mod fit;
/// Generic numerical optimizer (L-BFGS-B backend).
pub mod optimizer;

pub use fit::{FitManager, fit_to};
pub use optimizer::{
    LbfgsbOptimizer, Minimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig,
};
