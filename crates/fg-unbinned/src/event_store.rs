//! Columnar event storage for unbinned likelihood evaluation.

use fg_core::{DataSet, Error, Result, VarId, VariableArena};

/// Columnar event storage (Structure-of-Arrays / SoA).
///
/// One column per bound variable, all columns the same length. Binding order is
/// kept as given, duplicates included, so column `i` always belongs to
/// `variables()[i]`.
#[derive(Debug, Clone)]
pub struct EventStore {
    name: String,
    variables: Vec<VarId>,
    columns: Vec<Vec<f64>>,
}

impl EventStore {
    /// Empty store bound to `variables`.
    pub fn new(name: impl Into<String>, variables: Vec<VarId>) -> Self {
        let columns = vec![Vec::new(); variables.len()];
        Self { name: name.into(), variables, columns }
    }

    /// Create an [`EventStore`] from already materialized columns, one per variable.
    pub fn from_columns(
        name: impl Into<String>,
        variables: Vec<VarId>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let name = name.into();
        if columns.len() != variables.len() {
            return Err(Error::Validation(format!(
                "EventStore '{name}': {} variables but {} columns",
                variables.len(),
                columns.len()
            )));
        }
        let n_events = columns.first().map_or(0, Vec::len);
        for (i, col) in columns.iter().enumerate() {
            if col.len() != n_events {
                return Err(Error::Validation(format!(
                    "column length mismatch for column {i}: expected {n_events}, got {}",
                    col.len()
                )));
            }
            if col.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation(format!(
                    "column {i} of '{name}' contains non-finite values"
                )));
            }
        }
        Ok(Self { name, variables, columns })
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Bound variables, in binding order.
    pub fn variables(&self) -> &[VarId] {
        &self.variables
    }

    /// Position of the first column bound to `var`.
    pub fn index_of_variable(&self, var: VarId) -> Option<usize> {
        self.variables.iter().position(|v| *v == var)
    }

    /// First column bound to `var`.
    pub fn column(&self, var: VarId) -> Option<&[f64]> {
        let idx = self.index_of_variable(var)?;
        self.columns.get(idx).map(|c| c.as_slice())
    }

    /// Append one event made of each bound variable's current value.
    pub fn add_event(&mut self, vars: &VariableArena) -> Result<()> {
        let row = self
            .variables
            .iter()
            .map(|v| vars.try_get(*v).map(|var| var.value))
            .collect::<Result<Vec<_>>>()?;
        for (col, x) in self.columns.iter_mut().zip(row) {
            col.push(x);
        }
        Ok(())
    }

    /// Copy event `idx` back into the bound variables.
    pub fn load_event(&self, idx: usize, vars: &mut VariableArena) -> Result<()> {
        self.check_event(idx)?;
        // All handles are checked before anything is written.
        for v in &self.variables {
            vars.try_get(*v)?;
        }
        for (v, col) in self.variables.iter().zip(&self.columns) {
            vars.try_get_mut(*v)?.value = col[idx];
        }
        Ok(())
    }

    /// Overwrite every event's value of `var` with its current value.
    pub fn set_value_for_all_events(&mut self, var: VarId, vars: &VariableArena) -> Result<()> {
        let value = vars.try_get(var)?.value;
        let mut found = false;
        for (v, col) in self.variables.iter().zip(self.columns.iter_mut()) {
            if *v == var {
                col.fill(value);
                found = true;
            }
        }
        if !found {
            return Err(self.unbound(var));
        }
        Ok(())
    }

    /// Stored value of `var` in event `idx`.
    pub fn get_value(&self, var: VarId, idx: usize) -> Result<f64> {
        self.check_event(idx)?;
        let col = self.column(var).ok_or_else(|| self.unbound(var))?;
        Ok(col[idx])
    }

    fn check_event(&self, idx: usize) -> Result<()> {
        let len = self.n_events();
        if idx >= len {
            return Err(Error::IndexOutOfRange {
                what: format!("event of '{}'", self.name),
                index: idx,
                len,
            });
        }
        Ok(())
    }

    fn unbound(&self, var: VarId) -> Error {
        Error::Validation(format!("{var} is not bound to EventStore '{}'", self.name))
    }
}

impl DataSet for EventStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn variables(&self) -> &[VarId] {
        &self.variables
    }

    fn n_events(&self) -> usize {
        EventStore::n_events(self)
    }
}
