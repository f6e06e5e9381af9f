//! The registry context: variables, model nodes and slot bookkeeping.

use crate::node::{DataBinding, ModelNode, NodeArena, NodeId};
use crate::registry::ParameterRegistry;
use fg_core::{
    DataSet, Error, Result, SessionConfig, SlotArrays, VarId, Variable, VariableArena,
};
use std::collections::BTreeSet;

/// Owner of every variable and model node taking part in a fit, plus the
/// parameter registry they share.
///
/// A session is built by the fit-construction code and passed explicitly; no
/// state lives in globals, so independent sessions never interfere.
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    pub(crate) variables: VariableArena,
    pub(crate) nodes: NodeArena,
    pub(crate) registry: ParameterRegistry,
}

impl Default for Session {
    fn default() -> Self {
        Self::build(SessionConfig::default())
    }
}

impl Session {
    /// Create a session after validating `config`.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SessionConfig) -> Self {
        let registry = ParameterRegistry::new(config.max_params);
        Self { config, variables: VariableArena::new(), nodes: NodeArena::default(), registry }
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ---------------------------------------------------------------------------------------
    // Variables
    // ---------------------------------------------------------------------------------------

    /// Move a variable into the session.
    pub fn add_variable(&mut self, variable: Variable) -> VarId {
        self.variables.insert(variable)
    }

    /// Remove a variable no node references any more.
    pub fn remove_variable(&mut self, var: VarId) -> Result<Variable> {
        self.variables.remove(var)
    }

    /// Borrow a variable.
    pub fn variable(&self, var: VarId) -> Option<&Variable> {
        self.variables.get(var)
    }

    /// Mutably borrow a variable.
    pub fn variable_mut(&mut self, var: VarId) -> Option<&mut Variable> {
        self.variables.get_mut(var)
    }

    /// All variables.
    pub fn variables(&self) -> &VariableArena {
        &self.variables
    }

    /// All variables, mutably (datasets load events through this).
    pub fn variables_mut(&mut self) -> &mut VariableArena {
        &mut self.variables
    }

    /// Set a variable's value and mirror it into its parameter slot, if it has one.
    pub fn set_parameter_value(&mut self, var: VarId, value: f64) -> Result<()> {
        let v = self.variables.try_get_mut(var)?;
        v.set_value(value);
        if let Some(slot) = v.slot().filter(|_| self.registry.is_registered(var)) {
            self.registry.slots_mut().set_param(slot, value)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------------------------

    /// Parameter registry.
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Mutable parameter registry (call counter, slot writes).
    pub fn registry_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.registry
    }

    /// Slot arrays read by the evaluation layer.
    pub fn slots(&self) -> &SlotArrays {
        self.registry.slots()
    }

    /// Copy every registered variable's value into the parameter slots.
    pub fn sync_params(&mut self) -> Result<()> {
        self.registry.sync_params(&self.variables)
    }

    /// Copy the parameter slots back into the registered variables.
    pub fn update_variables(&mut self) -> Result<()> {
        self.registry.update_variables(&mut self.variables)
    }

    /// Register `var` as a parameter of `node` and return its slot.
    ///
    /// Registering a variable the node already owns returns the existing slot.
    /// A variable without a slot receives the smallest one not held by any
    /// registered variable.
    pub fn register_parameter(&mut self, node: NodeId, var: VarId) -> Result<usize> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        let v = self.variables.get_mut(var).ok_or_else(|| {
            Error::NullArgument(format!("{}: can not register {var}, it is not live", n.name()))
        })?;

        // A slot only counts if the registry handed it out.
        let assigned = if self.registry.is_registered(var) { v.slot() } else { None };
        if n.parameters.contains(&var) {
            if let Some(slot) = assigned {
                return Ok(slot);
            }
        } else {
            n.parameters.push(var);
        }

        let slot = match assigned {
            Some(slot) => slot,
            None => {
                let slot = match self.registry.allocate_slot() {
                    Ok(slot) => slot,
                    Err(e) => {
                        n.parameters.retain(|p| *p != var);
                        return Err(e);
                    }
                };
                log::debug!("{}: registering slot {slot} for {}", n.name(), v.name);
                v.set_slot(Some(slot));
                slot
            }
        };
        self.registry.add_reference(var, node);
        Ok(slot)
    }

    /// Remove `var` from `node` and from every node below it.
    ///
    /// The variable's slot is released once no node references it. A stale
    /// variable handle is ignored.
    pub fn unregister_parameter(&mut self, node: NodeId, var: VarId) -> Result<()> {
        if self.nodes.get(node).is_none() {
            return Err(unknown_node(node));
        }
        if !self.variables.contains(var) {
            return Ok(());
        }
        self.unregister_in_subtree(node, var)
    }

    fn unregister_in_subtree(&mut self, node: NodeId, var: VarId) -> Result<()> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        let v = self.variables.try_get_mut(var)?;
        log::debug!("{}: removing {}", n.name(), v.name);

        if let Some(pos) = n.parameters.iter().position(|p| *p == var) {
            n.parameters.remove(pos);
        }
        if self.registry.remove_reference(var, node) {
            if let Some(slot) = v.slot() {
                self.registry.release_slot(slot);
                v.set_slot(None);
            }
        }

        let children = n.components.clone();
        for child in children {
            self.unregister_in_subtree(child, var)?;
        }
        Ok(())
    }

    /// Reserve `amount` constants for `node` and record the offset as its `c_index`.
    pub fn register_constants(&mut self, node: NodeId, amount: usize) -> Result<usize> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        let offset = self.registry.allocate_constants(amount)?;
        log::debug!("{}: {amount} constants at offset {offset}", n.name());
        n.c_index = offset;
        Ok(offset)
    }

    // ---------------------------------------------------------------------------------------
    // Graph
    // ---------------------------------------------------------------------------------------

    /// Create a node, optionally with an initial observable.
    pub fn add_node(&mut self, name: impl Into<String>, observable: Option<VarId>) -> NodeId {
        let id = self.nodes.insert(ModelNode::new(name.into()));
        if let Some(obs) = observable {
            if self.variables.contains(obs) {
                if let Some(n) = self.nodes.get_mut(id) {
                    n.observables.push(obs);
                }
            }
        }
        id
    }

    /// Borrow a node.
    pub fn node(&self, node: NodeId) -> Option<&ModelNode> {
        self.nodes.get(node)
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut ModelNode> {
        self.nodes.get_mut(node)
    }

    /// Borrow a node or fail.
    pub fn try_node(&self, node: NodeId) -> Result<&ModelNode> {
        self.nodes.get(node).ok_or_else(|| unknown_node(node))
    }

    /// Append `child` to `parent`'s components. Cycles are rejected.
    pub fn add_component(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.try_node(parent)?;
        self.try_node(child)?;
        if parent == child || self.reaches(child, parent) {
            return Err(Error::Validation(format!(
                "adding {} under {} would create a cycle",
                self.nodes.get(child).map_or("?", |n| n.name()),
                self.nodes.get(parent).map_or("?", |n| n.name()),
            )));
        }
        if let Some(p) = self.nodes.get_mut(parent) {
            p.components.push(child);
        }
        Ok(())
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(n) = self.nodes.get(id) {
                stack.extend(n.components.iter().copied());
            }
        }
        false
    }

    /// Tear a node down: unregister its parameters (cascading into its
    /// components), detach it from every parent and free the handle.
    pub fn remove_node(&mut self, node: NodeId) -> Result<ModelNode> {
        let owned = self.try_node(node)?.parameters.clone();
        for var in owned {
            self.unregister_parameter(node, var)?;
        }
        for (_, n) in self.nodes.iter_mut() {
            n.components.retain(|c| *c != node);
        }
        self.nodes.remove(node).ok_or_else(|| unknown_node(node))
    }

    /// Add an observable to `node`. Stale handles and duplicates are ignored.
    pub fn register_observable(&mut self, node: NodeId, var: VarId) -> Result<()> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        if !self.variables.contains(var) || n.observables.contains(&var) {
            return Ok(());
        }
        n.observables.push(var);
        Ok(())
    }

    /// Names of uninitialised nodes in the subtree, depth-first, in component order.
    pub fn check_init_status(&self, node: NodeId) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.collect_uninitialised(node, &mut out)?;
        Ok(out)
    }

    fn collect_uninitialised(&self, node: NodeId, out: &mut Vec<String>) -> Result<()> {
        let n = self.try_node(node)?;
        if !n.properly_initialised {
            out.push(n.name().to_string());
        }
        for child in &n.components {
            self.collect_uninitialised(*child, out)?;
        }
        Ok(())
    }

    /// Fail with [`Error::Misconfiguration`] if any node in the subtree is uninitialised.
    pub fn ensure_initialised(&self, node: NodeId) -> Result<()> {
        let bad = self.check_init_status(node)?;
        if bad.is_empty() { Ok(()) } else { Err(Error::Misconfiguration(bad)) }
    }

    /// Write `value` into the normalisation slot of every node in the subtree.
    pub fn recursive_set_normalisation(&mut self, node: NodeId, value: f64) -> Result<()> {
        let n = self.nodes.get(node).ok_or_else(|| unknown_node(node))?;
        let offset = n.parameters_offset;
        let children = n.components.clone();
        self.registry.slots_mut().set_normalisation(offset, value)?;
        for child in children {
            self.recursive_set_normalisation(child, value)?;
        }
        Ok(())
    }

    /// Union of the parameters owned anywhere in the subtree.
    pub fn parameters(&self, node: NodeId) -> Result<BTreeSet<VarId>> {
        let mut out = BTreeSet::new();
        self.fold_subtree(node, &mut |n| out.extend(n.parameters.iter().copied()))?;
        Ok(out)
    }

    /// Union of the observables owned anywhere in the subtree.
    pub fn observables(&self, node: NodeId) -> Result<BTreeSet<VarId>> {
        let mut out = BTreeSet::new();
        self.fold_subtree(node, &mut |n| out.extend(n.observables.iter().copied()))?;
        Ok(out)
    }

    fn fold_subtree(&self, node: NodeId, f: &mut dyn FnMut(&ModelNode)) -> Result<()> {
        let n = self.try_node(node)?;
        f(n);
        for child in &n.components {
            self.fold_subtree(*child, f)?;
        }
        Ok(())
    }

    /// First parameter named `name`: own list first, then components depth-first.
    pub fn parameter_by_name(&self, node: NodeId, name: &str) -> Result<Option<VarId>> {
        let n = self.try_node(node)?;
        let own = n
            .parameters
            .iter()
            .copied()
            .find(|p| self.variables.get(*p).is_some_and(|v| v.name == name));
        if own.is_some() {
            return Ok(own);
        }
        for child in &n.components {
            if let Some(found) = self.parameter_by_name(*child, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Whether any parameter owned directly by `node` changed. Components are not consulted.
    pub fn parameters_changed(&self, node: NodeId) -> Result<bool> {
        let n = self.try_node(node)?;
        Ok(n.parameters.iter().any(|p| self.variables.get(*p).is_some_and(|v| v.changed())))
    }

    /// Set the integration bin count and rebuild the node's normalisation ranges.
    pub fn set_integration_fineness(&mut self, node: NodeId, bins: usize) -> Result<()> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        n.integration_bins = bins;
        let mut ranges = Vec::with_capacity(3 * n.observables.len());
        for obs in &n.observables {
            let v = self.variables.try_get(*obs)?;
            let b = if bins > 0 { bins } else { v.num_bins };
            ranges.extend([v.lower_limit, v.upper_limit, b as f64]);
        }
        n.norm_ranges = ranges;
        Ok(())
    }

    /// Set the events-per-task hint.
    pub fn set_events_per_task(&mut self, node: NodeId, events: usize) -> Result<()> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        n.events_per_task = events;
        Ok(())
    }

    /// Write index metadata `[n_params, slots.., n_obs]` for every node in the subtree.
    ///
    /// Each node's block offset becomes its `parameters_offset`. A block that
    /// fits in the node's previous one is rewritten in place; a grown block is
    /// appended and the old entries are left behind, since the index region is
    /// never compacted.
    pub fn initialise_indices(&mut self, node: NodeId) -> Result<usize> {
        let n = self.nodes.get(node).ok_or_else(|| unknown_node(node))?;
        let mut block = Vec::with_capacity(n.parameters.len() + 2);
        block.push(n.parameters.len() as u32);
        for p in &n.parameters {
            let v = self.variables.try_get(*p)?;
            let slot = v.slot().ok_or_else(|| {
                Error::Computation(format!("{}: parameter '{}' has no slot", n.name(), v.name))
            })?;
            block.push(slot as u32);
        }
        block.push(n.observables.len() as u32);

        let capacity = n.index_block_len.filter(|cap| *cap >= block.len());
        let previous = n.parameters_offset;
        let children = n.components.clone();
        let (offset, capacity) = match capacity {
            Some(cap) => (previous, cap),
            None => (self.registry.allocate_indices(block.len())?, block.len()),
        };
        self.registry.slots_mut().write_indices(offset, &block)?;
        if let Some(n) = self.nodes.get_mut(node) {
            n.parameters_offset = offset;
            n.index_block_len = Some(capacity);
        }

        for child in children {
            self.initialise_indices(child)?;
        }
        Ok(offset)
    }

    /// Record `data` as the dataset bound to `node`.
    pub fn bind_data(&mut self, node: NodeId, data: &dyn DataSet) -> Result<()> {
        let n = self.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        n.data = Some(DataBinding { name: data.name().to_string(), n_events: data.n_events() });
        Ok(())
    }
}

pub(crate) fn unknown_node(node: NodeId) -> Error {
    Error::Validation(format!("{node} is not a live model node"))
}
