//! Common data types for fitgraph

use serde::{Deserialize, Serialize};

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Names of the floated parameters, in slot order
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of function evaluations
    pub n_evaluations: usize,

    /// Minimizer termination message
    pub message: String,
}

impl FitResult {
    /// Create a new fit result
    pub fn new(
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self {
            parameter_names,
            parameters,
            uncertainties,
            covariance: None,
            nll,
            converged,
            n_evaluations,
            message: String::new(),
        }
    }

    /// Attach a covariance matrix
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Attach the minimizer's termination message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Best-fit value for a parameter by name (first match).
    pub fn value(&self, name: &str) -> Option<f64> {
        let i = self.parameter_names.iter().position(|n| n == name)?;
        self.parameters.get(i).copied()
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
