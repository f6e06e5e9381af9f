//! Parameter registry: slot allocation and referencing sets.
//!
//! Slots are raw offsets into [`SlotArrays`], so they stay small and dense:
//! a released slot is handed out again before any fresh one, always the
//! smallest released slot first. The constants region is a separate cursor
//! that only ever grows.

use crate::node::NodeId;
use fg_core::{Error, Result, SlotArrays, VarId, VariableArena};
use std::collections::{BTreeMap, BTreeSet};

/// First usable constant; slot 0 holds the event count, written by the evaluation layer.
pub const FIRST_CONSTANT: usize = 1;

/// Slot bookkeeping shared by every node in a [`crate::Session`].
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    max_params: usize,
    references: BTreeMap<VarId, BTreeSet<NodeId>>,
    free_slots: BTreeSet<usize>,
    next_slot: usize,
    total_constants: usize,
    index_cursor: usize,
    call_number: u64,
    slots: SlotArrays,
}

impl ParameterRegistry {
    /// Empty registry over `max_params` slots.
    pub fn new(max_params: usize) -> Self {
        Self {
            max_params,
            references: BTreeMap::new(),
            free_slots: BTreeSet::new(),
            next_slot: 0,
            total_constants: FIRST_CONSTANT,
            index_cursor: 0,
            call_number: 0,
            slots: SlotArrays::new(max_params),
        }
    }

    /// Fixed slot capacity.
    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// One past the highest slot in use: parameter slots are dense in `[0, total_params)`.
    pub fn total_params(&self) -> usize {
        self.next_slot
    }

    /// Constants cursor: constants live in `[1, total_constants)`.
    pub fn total_constants(&self) -> usize {
        self.total_constants
    }

    /// Next free position in the index metadata array.
    pub fn index_cursor(&self) -> usize {
        self.index_cursor
    }

    /// Global call counter, bumped once per fit iteration.
    pub fn call_number(&self) -> u64 {
        self.call_number
    }

    /// Signal a new iteration to the evaluation layer.
    pub fn bump_call_number(&mut self) -> u64 {
        self.call_number += 1;
        self.call_number
    }

    /// Slot arrays shared with the evaluation layer.
    pub fn slots(&self) -> &SlotArrays {
        &self.slots
    }

    /// Mutable access to the slot arrays.
    pub fn slots_mut(&mut self) -> &mut SlotArrays {
        &mut self.slots
    }

    /// Nodes referencing `var`; `None` once the last reference is gone.
    pub fn referencing_nodes(&self, var: VarId) -> Option<&BTreeSet<NodeId>> {
        self.references.get(&var)
    }

    /// Whether any node references `var`.
    pub fn is_registered(&self, var: VarId) -> bool {
        self.references.contains_key(&var)
    }

    /// Every referenced variable.
    pub fn registered_variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.references.keys().copied()
    }

    pub(crate) fn add_reference(&mut self, var: VarId, node: NodeId) {
        self.references.entry(var).or_default().insert(node);
    }

    /// Drop one reference; returns `true` if that was the last one.
    pub(crate) fn remove_reference(&mut self, var: VarId, node: NodeId) -> bool {
        let Some(nodes) = self.references.get_mut(&var) else {
            return false;
        };
        nodes.remove(&node);
        if nodes.is_empty() {
            self.references.remove(&var);
            return true;
        }
        false
    }

    /// Smallest slot not held by any registered variable.
    pub(crate) fn allocate_slot(&mut self) -> Result<usize> {
        if let Some(slot) = self.free_slots.pop_first() {
            return Ok(slot);
        }
        if self.next_slot >= self.max_params {
            return Err(Error::CapacityExceeded {
                what: "parameters",
                requested: self.next_slot + 1,
                capacity: self.max_params,
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(slot)
    }

    pub(crate) fn release_slot(&mut self, slot: usize) {
        if slot + 1 == self.next_slot {
            self.next_slot -= 1;
            // Keep the high-water mark tight so fresh slots stay dense.
            while self.next_slot > 0 && self.free_slots.remove(&(self.next_slot - 1)) {
                self.next_slot -= 1;
            }
        } else if slot < self.next_slot {
            self.free_slots.insert(slot);
        }
    }

    /// Reserve `amount` constants; the region is never reclaimed.
    pub(crate) fn allocate_constants(&mut self, amount: usize) -> Result<usize> {
        let requested = self.total_constants + amount;
        if requested >= self.max_params {
            return Err(Error::CapacityExceeded {
                what: "constants",
                requested,
                capacity: self.max_params,
            });
        }
        let offset = self.total_constants;
        self.total_constants = requested;
        Ok(offset)
    }

    /// Reserve `len` entries of index metadata.
    pub(crate) fn allocate_indices(&mut self, len: usize) -> Result<usize> {
        let requested = self.index_cursor + len;
        if requested > self.max_params {
            return Err(Error::CapacityExceeded {
                what: "index metadata",
                requested,
                capacity: self.max_params,
            });
        }
        let offset = self.index_cursor;
        self.index_cursor = requested;
        Ok(offset)
    }

    /// Copy every registered variable's value into its parameter slot.
    pub fn sync_params(&mut self, variables: &VariableArena) -> Result<()> {
        for var in self.references.keys() {
            let v = variables.try_get(*var)?;
            if let Some(slot) = v.slot() {
                self.slots.set_param(slot, v.value)?;
            }
        }
        Ok(())
    }

    /// Copy parameter slots back into the registered variables.
    ///
    /// Only variables whose slot value differs are written, so the changed
    /// flag is raised exactly for the parameters that moved.
    pub fn update_variables(&self, variables: &mut VariableArena) -> Result<()> {
        for var in self.references.keys() {
            let v = variables.try_get_mut(*var)?;
            if let Some(slot) = v.slot() {
                let value = self.slots.params()[slot];
                if value.to_bits() != v.value.to_bits() {
                    v.set_value(value);
                }
            }
        }
        Ok(())
    }
}
