//! Fixed-capacity arrays shared with the evaluation layer.
//!
//! All three arrays are indexed by slot and have the same length (`max_params`).
//! They are written during setup and read, never written, by evaluation kernels.

use crate::{Error, Result};

/// Parameter values, normalisation results and index metadata, keyed by slot.
#[derive(Debug, Clone)]
pub struct SlotArrays {
    params: Vec<f64>,
    normalisation: Vec<f64>,
    indices: Vec<u32>,
}

impl SlotArrays {
    /// Zeroed arrays of length `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            params: vec![0.0; capacity],
            normalisation: vec![0.0; capacity],
            indices: vec![0; capacity],
        }
    }

    /// Capacity shared by all three arrays.
    pub fn capacity(&self) -> usize {
        self.params.len()
    }

    /// Current parameter values.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Per-slot normalisation results.
    pub fn normalisation(&self) -> &[f64] {
        &self.normalisation
    }

    /// Index / offset metadata.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Write a parameter value.
    pub fn set_param(&mut self, slot: usize, value: f64) -> Result<()> {
        let len = self.params.len();
        let p = self.params.get_mut(slot).ok_or_else(|| out_of_range("parameter", slot, len))?;
        *p = value;
        Ok(())
    }

    /// Write a normalisation value.
    pub fn set_normalisation(&mut self, slot: usize, value: f64) -> Result<()> {
        let len = self.normalisation.len();
        let n = self
            .normalisation
            .get_mut(slot)
            .ok_or_else(|| out_of_range("normalisation", slot, len))?;
        *n = value;
        Ok(())
    }

    /// Copy `block` into the index array starting at `offset`.
    pub fn write_indices(&mut self, offset: usize, block: &[u32]) -> Result<()> {
        let end = offset + block.len();
        if end > self.indices.len() {
            return Err(Error::CapacityExceeded {
                what: "index metadata",
                requested: end,
                capacity: self.indices.len(),
            });
        }
        self.indices[offset..end].copy_from_slice(block);
        Ok(())
    }
}

fn out_of_range(what: &str, index: usize, len: usize) -> Error {
    Error::IndexOutOfRange { what: format!("{what} slot"), index, len }
}
