//! Fit entry point: bind a dataset to a model and hand it to a minimizer.

use crate::optimizer::{LbfgsbOptimizer, Minimizer, ObjectiveFunction, OptimizationResult};
use fg_core::{DataSet, Error, EvaluationBackend, FitResult, Result, VarId};
use fg_model::{NodeId, Session};
use nalgebra::DMatrix;
use std::cell::RefCell;

/// Drives one fit of a model subtree against one dataset.
///
/// Construction does the setup: checks that every node is initialised, binds
/// the dataset, writes index metadata and syncs the parameter slots. Fixed
/// variables keep their slots but are not floated.
pub struct FitManager<'a> {
    session: RefCell<&'a mut Session>,
    root: NodeId,
    data: &'a dyn DataSet,
    backend: &'a dyn EvaluationBackend,
    floated: Vec<VarId>,
    names: Vec<String>,
    init: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl<'a> FitManager<'a> {
    /// Prepare `root` for fitting against `data`.
    pub fn new(
        session: &'a mut Session,
        root: NodeId,
        data: &'a dyn DataSet,
        backend: &'a dyn EvaluationBackend,
    ) -> Result<Self> {
        session.ensure_initialised(root)?;
        session.bind_data(root, data)?;
        session.initialise_indices(root)?;
        session.sync_params()?;

        let mut floated = Vec::new();
        for p in session.parameters(root)? {
            let v = session.variables().try_get(p)?;
            if !v.fixed {
                floated.push((v.slot(), p));
            }
        }
        floated.sort();
        let floated: Vec<VarId> = floated.into_iter().map(|(_, p)| p).collect();

        let mut names = Vec::with_capacity(floated.len());
        let mut init = Vec::with_capacity(floated.len());
        let mut bounds = Vec::with_capacity(floated.len());
        for p in &floated {
            let v = session.variables().try_get(*p)?;
            names.push(v.name.clone());
            init.push(v.value);
            bounds.push(v.bounds());
        }

        log::info!(
            "fit of '{}' on '{}': {} floated parameters, {} events, backend {}",
            session.try_node(root)?.name(),
            data.name(),
            floated.len(),
            data.n_events(),
            backend.name()
        );

        Ok(Self {
            session: RefCell::new(session),
            root,
            data,
            backend,
            floated,
            names,
            init,
            bounds,
        })
    }

    /// Names of the floated parameters, in slot order.
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// Minimize with the default L-BFGS-B optimizer.
    pub fn fit(&self) -> Result<FitResult> {
        self.fit_with(&LbfgsbOptimizer::default())
    }

    /// Minimize with `minimizer`, then write best-fit values and errors back
    /// into the variables.
    pub fn fit_with(&self, minimizer: &dyn Minimizer) -> Result<FitResult> {
        let opt = minimizer.minimize(self, &self.init, &self.bounds)?;
        let fr = self.result_from(opt)?;

        let mut session = self.session.borrow_mut();
        for ((p, value), error) in self.floated.iter().zip(&fr.parameters).zip(&fr.uncertainties) {
            session.set_parameter_value(*p, *value)?;
            session.variables_mut().try_get_mut(*p)?.error = *error;
        }
        log::info!(
            "fit finished: nll={:.6} converged={} calls={}",
            fr.nll,
            fr.converged,
            session.registry().call_number()
        );
        Ok(fr)
    }

    fn result_from(&self, opt: OptimizationResult) -> Result<FitResult> {
        let n = opt.parameters.len();
        let hessian = compute_hessian(self, &opt.parameters)?;

        let fr = match invert_hessian(&hessian, n) {
            Some(cov) => {
                let uncertainties = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
                // nalgebra is column-major; the covariance is symmetric so the order is moot.
                let cov_flat = cov.iter().copied().collect();
                FitResult::new(
                    self.names.clone(),
                    opt.parameters,
                    uncertainties,
                    opt.fval,
                    opt.converged,
                    opt.n_fev,
                )
                .with_covariance(cov_flat)
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                FitResult::new(
                    self.names.clone(),
                    opt.parameters,
                    diagonal_uncertainties(&hessian, n),
                    opt.fval,
                    opt.converged,
                    opt.n_fev,
                )
            }
        };
        Ok(fr.with_message(opt.message))
    }
}

impl ObjectiveFunction for FitManager<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let mut session = self.session.borrow_mut();
        for (p, x) in self.floated.iter().zip(params) {
            session.set_parameter_value(*p, *x)?;
        }
        session.registry_mut().bump_call_number();

        let nll = self.backend.nll(session.slots(), self.data)?;
        if !nll.is_finite() {
            return Err(session.abort_with_dump(
                &format!("non-finite NLL {nll} from backend {}", self.backend.name()),
                Some(self.root),
            ));
        }
        Ok(nll)
    }
}

/// Fit `root` to `data` with the default minimizer.
pub fn fit_to(
    session: &mut Session,
    root: NodeId,
    data: &dyn DataSet,
    backend: &dyn EvaluationBackend,
) -> Result<FitResult> {
    FitManager::new(session, root, data, backend)?.fit()
}

fn compute_hessian(objective: &dyn ObjectiveFunction, best_params: &[f64]) -> Result<DMatrix<f64>> {
    let n = best_params.len();
    let grad_center = objective.gradient(best_params)?;

    let mut hessian = DMatrix::zeros(n, n);
    for j in 0..n {
        let eps = 1e-4 * best_params[j].abs().max(1.0);

        let mut params_plus = best_params.to_vec();
        params_plus[j] += eps;
        let grad_plus = objective.gradient(&params_plus)?;

        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    // Symmetrise: H = (H + H^T) / 2
    let ht = hessian.transpose();
    hessian = (&hessian + &ht) * 0.5;

    if hessian.iter().any(|x| !x.is_finite()) {
        return Err(Error::Computation("non-finite Hessian at the minimum".into()));
    }
    Ok(hessian)
}

/// Covariance via damped Cholesky; `None` if the Hessian is not usable.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    for _ in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            let cov = chol.solve(&identity);
            if (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) {
                return Some(cov);
            }
            return None;
        }
        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            h_damped[(i, i)] += next_damping - damping;
        }
        damping = next_damping;
    }
    None
}

fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt()).collect()
}
