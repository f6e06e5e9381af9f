//! Named scalar variables and the arena that owns them.
//!
//! Model nodes and datasets never hold a [`Variable`] directly. They hold a
//! [`VarId`] handle into a [`VariableArena`], so the same variable can be shared
//! by any number of nodes and outlive all of them.

use crate::{Error, Result};
use std::fmt;

/// Default number of bins used when an observable is integrated numerically.
pub const DEFAULT_NUM_BINS: usize = 100;

/// Stable, generation-checked handle to a [`Variable`] in a [`VariableArena`].
///
/// Identity is the handle, not the name: two variables may share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId {
    index: u32,
    generation: u32,
}

impl VarId {
    /// Position of the handle in its arena.
    pub fn arena_index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}v{}", self.index, self.generation)
    }
}

/// A named scalar: fit parameter or per-event observable.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Display name. Not unique.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Uncertainty (initial step for parameters, fit error afterwards).
    pub error: f64,
    /// Lower limit.
    pub lower_limit: f64,
    /// Upper limit.
    pub upper_limit: f64,
    /// Number of bins for numeric integration over this variable.
    pub num_bins: usize,
    /// Fixed variables are not floated by the minimizer.
    pub fixed: bool,
    changed: bool,
    slot: Option<usize>,
}

impl Variable {
    /// Unbounded variable with the given value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            error: 0.0,
            lower_limit: f64::NEG_INFINITY,
            upper_limit: f64::INFINITY,
            num_bins: DEFAULT_NUM_BINS,
            fixed: false,
            changed: false,
            slot: None,
        }
    }

    /// Bounded parameter with an initial step size.
    pub fn with_limits(
        name: impl Into<String>,
        value: f64,
        error: f64,
        lower_limit: f64,
        upper_limit: f64,
    ) -> Self {
        Self { error, lower_limit, upper_limit, ..Self::new(name, value) }
    }

    /// Observable over `[low, high]`, starting at the midpoint.
    pub fn observable(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            lower_limit: low,
            upper_limit: high,
            fixed: true,
            ..Self::new(name, 0.5 * (low + high))
        }
    }

    /// Set the value and raise the changed flag.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
        self.changed = true;
    }

    /// Whether the value changed since the flag was last cleared.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Lower the changed flag.
    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    /// Assigned slot, if any.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Slot as a signed index, `-1` when unassigned.
    pub fn index(&self) -> i64 {
        self.slot.map_or(-1, |s| s as i64)
    }

    /// Set or clear the slot. Reserved for the parameter registry; a slot
    /// set anywhere else is dropped on insertion and ignored on registration.
    #[doc(hidden)]
    pub fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }

    /// `(lower, upper)` limits.
    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_limit, self.upper_limit)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u32,
    variable: Option<Variable>,
}

/// Owner of all variables in a session.
///
/// Removed entries are recycled with a bumped generation, so a handle to a
/// removed variable never aliases its successor.
#[derive(Debug, Clone, Default)]
pub struct VariableArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    len: usize,
}

impl VariableArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a variable into the arena and return its handle.
    ///
    /// Any slot the variable carries (say, from cloning a registered one) is
    /// cleared: slots are only ever assigned by the registry.
    pub fn insert(&mut self, mut variable: Variable) -> VarId {
        variable.slot = None;
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.variable = Some(variable);
            return VarId { index, generation: entry.generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry { generation: 0, variable: Some(variable) });
        VarId { index, generation: 0 }
    }

    /// Remove a variable. Fails while it still holds a parameter slot.
    pub fn remove(&mut self, id: VarId) -> Result<Variable> {
        let var = self.get(id).ok_or_else(|| Error::NullArgument(format!("{id} is not live")))?;
        if let Some(slot) = var.slot() {
            return Err(Error::Validation(format!(
                "variable '{}' still holds slot {slot}; unregister it first",
                var.name
            )));
        }
        let entry = &mut self.entries[id.index as usize];
        let var = entry.variable.take().ok_or_else(|| Error::NullArgument(id.to_string()))?;
        self.free.push(id.index);
        self.len -= 1;
        Ok(var)
    }

    /// Whether `id` names a live variable.
    pub fn contains(&self, id: VarId) -> bool {
        self.get(id).is_some()
    }

    /// Borrow a variable; `None` for stale handles.
    pub fn get(&self, id: VarId) -> Option<&Variable> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.variable.as_ref()
    }

    /// Mutably borrow a variable; `None` for stale handles.
    pub fn get_mut(&mut self, id: VarId) -> Option<&mut Variable> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.variable.as_mut()
    }

    /// Borrow a variable or fail with [`Error::NullArgument`].
    pub fn try_get(&self, id: VarId) -> Result<&Variable> {
        self.get(id).ok_or_else(|| Error::NullArgument(format!("{id} is not a live variable")))
    }

    /// Mutably borrow a variable or fail with [`Error::NullArgument`].
    pub fn try_get_mut(&mut self, id: VarId) -> Result<&mut Variable> {
        self.get_mut(id).ok_or_else(|| Error::NullArgument(format!("{id} is not a live variable")))
    }

    /// Number of live variables.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no variable is live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live variables with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.variable.as_ref().map(|v| (VarId { index: i as u32, generation: e.generation }, v))
        })
    }
}
