//! Model nodes and the arena that owns them.

use fg_core::VarId;
use std::fmt;

/// Stable, generation-checked handle to a [`ModelNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

/// Name and size of the dataset last bound to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBinding {
    /// Dataset name.
    pub name: String,
    /// Number of events at bind time.
    pub n_events: usize,
}

/// A node in the composite model graph.
///
/// Every node has the same capabilities; a composite is simply a node with
/// components. Graph operations live on [`crate::Session`] because they need
/// the registry and the variable arena alongside the node.
#[derive(Debug, Clone)]
pub struct ModelNode {
    name: String,
    pub(crate) properly_initialised: bool,
    pub(crate) components: Vec<NodeId>,
    pub(crate) parameters: Vec<VarId>,
    pub(crate) observables: Vec<VarId>,
    pub(crate) c_index: usize,
    pub(crate) parameters_offset: usize,
    pub(crate) index_block_len: Option<usize>,
    pub(crate) events_per_task: usize,
    pub(crate) integration_bins: usize,
    pub(crate) norm_ranges: Vec<f64>,
    pub(crate) data: Option<DataBinding>,
}

impl ModelNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            properly_initialised: true,
            components: Vec::new(),
            parameters: Vec::new(),
            observables: Vec::new(),
            c_index: 0,
            parameters_offset: 0,
            index_block_len: None,
            events_per_task: 0,
            integration_bins: 0,
            norm_ranges: Vec::new(),
            data: None,
        }
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False for nodes that still need special setup before a fit.
    pub fn is_properly_initialised(&self) -> bool {
        self.properly_initialised
    }

    /// Mark whether the node finished its setup.
    pub fn set_properly_initialised(&mut self, ok: bool) {
        self.properly_initialised = ok;
    }

    /// Child nodes, in insertion order.
    pub fn components(&self) -> &[NodeId] {
        &self.components
    }

    /// Directly-owned parameters, in registration order.
    pub fn parameter_list(&self) -> &[VarId] {
        &self.parameters
    }

    /// Directly-owned observables, in registration order.
    pub fn observable_list(&self) -> &[VarId] {
        &self.observables
    }

    /// Offset of this node's block in the constants region.
    pub fn c_index(&self) -> usize {
        self.c_index
    }

    /// Offset of this node's block in the index metadata array; also its normalisation slot.
    pub fn parameters_offset(&self) -> usize {
        self.parameters_offset
    }

    /// Events-per-task hint for the evaluation layer (0 = let it decide).
    pub fn events_per_task(&self) -> usize {
        self.events_per_task
    }

    /// Integration bin count (0 = each observable's own bin count).
    pub fn integration_bins(&self) -> usize {
        self.integration_bins
    }

    /// Flattened `(low, high, bins)` triples, one per observable.
    pub fn norm_ranges(&self) -> &[f64] {
        &self.norm_ranges
    }

    /// Dataset bound by the last fit, if any.
    pub fn data(&self) -> Option<&DataBinding> {
        self.data.as_ref()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<ModelNode>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: ModelNode) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            return NodeId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, node: Some(node) });
        NodeId { index, generation: 0 }
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<ModelNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        self.free.push(id.index);
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&ModelNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut ModelNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut ModelNode)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.node.as_mut().map(|n| (NodeId { index: i as u32, generation }, n))
        })
    }
}
