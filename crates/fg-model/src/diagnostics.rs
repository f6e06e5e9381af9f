//! Diagnostic dump for unrecoverable inconsistencies found mid-fit.

use crate::node::NodeId;
use crate::session::Session;
use fg_core::Error;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;

/// Snapshot of the registry taken when a fit has to be abandoned.
#[derive(Debug)]
pub struct DiagnosticDump {
    /// Why the fit is being abandoned.
    pub reason: String,
    /// `file:line` of the caller that gave up.
    pub location: String,
    /// Name of the requesting node and `(name, slot, slot value)` for each of its parameters.
    pub node: Option<(String, Vec<(String, usize, f64)>)>,
    /// Parameter slots `[0, total_params)`.
    pub params: Vec<f64>,
    /// Captured call stack.
    pub backtrace: String,
}

impl fmt::Display for DiagnosticDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Abort called from {} due to {}", self.location, self.reason)?;
        if let Some((name, pars)) = &self.node {
            writeln!(f, "Parameters of {name} :")?;
            for (p, slot, value) in pars {
                writeln!(f, "  {p} ({slot}) :\t{value}")?;
            }
        }
        writeln!(f, "Parameters ({}) :", self.params.len())?;
        let line: Vec<String> = self.params.iter().map(f64::to_string).collect();
        writeln!(f, "{}", line.join(" "))?;
        write!(f, "{}", self.backtrace)
    }
}

impl Session {
    /// Build a [`DiagnosticDump`] for `reason`, optionally focused on `node`.
    #[track_caller]
    pub fn diagnostic_dump(&self, reason: &str, node: Option<NodeId>) -> DiagnosticDump {
        let caller = Location::caller();
        let params = self.slots().params()[..self.registry.total_params()].to_vec();

        let node = node.and_then(|id| {
            let n = self.node(id)?;
            let pars = self
                .parameters(id)
                .ok()?
                .into_iter()
                .filter_map(|p| {
                    let v = self.variable(p)?;
                    let slot = v.slot()?;
                    Some((v.name.clone(), slot, params.get(slot).copied().unwrap_or(f64::NAN)))
                })
                .collect();
            Some((n.name().to_string(), pars))
        });

        DiagnosticDump {
            reason: reason.to_string(),
            location: format!("{}:{}", caller.file(), caller.line()),
            node,
            params,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Log a [`DiagnosticDump`] and return the fatal error to propagate.
    #[track_caller]
    pub fn abort_with_dump(&self, reason: &str, node: Option<NodeId>) -> Error {
        let dump = self.diagnostic_dump(reason, node);
        log::error!("{dump}");
        Error::Computation(reason.to_string())
    }
}
