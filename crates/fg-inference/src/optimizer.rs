//! Minimizers a fit can be handed to.
//!
//! [`Minimizer`] is the seam [`crate::FitManager`] submits to; [`LbfgsbOptimizer`]
//! drives argmin's L-BFGS and keeps the search inside each parameter's limits
//! by clamping.

use argmin::core::{
    CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use fg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

/// Stopping criteria and history length for [`LbfgsbOptimizer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Iteration cap.
    pub max_iter: u64,
    /// Gradient-norm tolerance; the cost tolerance is derived from it.
    pub tol: f64,
    /// Correction pairs kept for the inverse-Hessian estimate.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// What a [`Minimizer`] reports back.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Parameters at the best point seen, inside the limits.
    pub parameters: Vec<f64>,
    /// Objective at `parameters`.
    pub fval: f64,
    /// Solver iterations.
    pub n_iter: u64,
    /// Objective calls made by the solver.
    pub n_fev: usize,
    /// Gradient calls made by the solver.
    pub n_gev: usize,
    /// True only if a convergence criterion stopped the solver.
    pub converged: bool,
    /// Termination status as text.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "minimum {:.6} after {} iterations ({} cost / {} gradient calls), converged: {}",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// A scalar function of the floated parameters.
pub trait ObjectiveFunction {
    /// Value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`. Defaults to central differences over [`Self::eval`].
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut shifted = params.to_vec();
        let mut grad = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            let h = 1e-8 * params[i].abs().max(1.0);
            shifted[i] = params[i] + h;
            let up = self.eval(&shifted)?;
            shifted[i] = params[i] - h;
            let down = self.eval(&shifted)?;
            shifted[i] = params[i];
            grad.push((up - down) / (2.0 * h));
        }
        Ok(grad)
    }
}

/// The minimizer a fit is submitted to.
pub trait Minimizer {
    /// Minimize `objective` from `init_params` inside `bounds`.
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult>;
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Zero gradient components that would push a parameter sitting on a limit outward.
fn project_gradient(grad: &mut [f64], at: &[f64], bounds: &[(f64, f64)]) {
    const EDGE: f64 = 1e-12;
    for ((g, &x), &(lo, hi)) in grad.iter_mut().zip(at).zip(bounds) {
        let outward = (x <= lo + EDGE && *g > 0.0) || (x >= hi - EDGE && *g < 0.0);
        if outward {
            *g = 0.0;
        }
    }
}

fn solver_error(e: Error) -> argmin::core::Error {
    argmin::core::Error::msg(e.to_string())
}

/// Adapts an [`ObjectiveFunction`] to argmin, evaluating at clamped points
/// and counting calls.
struct Clamped<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    cost_calls: &'a Cell<usize>,
    grad_calls: &'a Cell<usize>,
}

impl CostFunction for Clamped<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        self.cost_calls.set(self.cost_calls.get() + 1);
        self.objective.eval(&clamp_params(params, self.bounds)).map_err(solver_error)
    }
}

impl Gradient for Clamped<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        self.grad_calls.set(self.grad_calls.get() + 1);
        let at = clamp_params(params, self.bounds);
        let mut grad = self.objective.gradient(&at).map_err(solver_error)?;
        project_gradient(&mut grad, &at, self.bounds);
        Ok(grad)
    }
}

/// L-BFGS over clamped parameters, the default [`Minimizer`].
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Optimizer with the given stopping criteria.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Stopping criteria in use.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

impl Minimizer for LbfgsbOptimizer {
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "{} parameters but {} limit pairs",
                init_params.len(),
                bounds.len()
            )));
        }
        if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi)
        {
            return Err(Error::Validation(format!("invalid bounds ({lo}, {hi})")));
        }

        let cost_calls = Cell::new(0);
        let grad_calls = Cell::new(0);
        let problem =
            Clamped { objective, bounds, cost_calls: &cost_calls, grad_calls: &grad_calls };

        // argmin's default cost tolerance is machine epsilon, too tight for an NLL.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(|e| {
                Error::Validation(format!("bad optimizer tolerance {}: {e}", self.config.tol))
            })?;

        let start = clamp_params(init_params, bounds);
        let res = Executor::new(problem, solver)
            .configure(|state| state.param(start).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("minimization aborted: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("solver returned no parameters".to_string()))?;
        let status = state.get_termination_status();

        Ok(OptimizationResult {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: cost_calls.get(),
            n_gev: grad_calls.get(),
            converged: is_converged(status),
            message: status.to_string(),
        })
    }
}

fn is_converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    )
}

impl Default for LbfgsbOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
