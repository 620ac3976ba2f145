//! Fixed layer offsets for the node arena.
//!
//! The tree is one flat array of [`TreeNode`](crate::TreeNode)s. Layer `k`
//! (0 = leaves) owns the index range `offset(k)..offset(k) + capacity(k)`,
//! and the capacities are worst-case bounds computed from the run's sizing
//! alone, so nothing is allocated while a tree is built:
//!
//! ```text
//! capacity(0)     = min(N, max(8^L, unsorted_threshold))
//! capacity(k > 0) = min(N, 8^(L - k))
//! offset(k)       = capacity(0) + ... + capacity(k - 1)
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::morton::{BRANCHING_FACTOR, MAX_KEY_LAYERS};

/// Layers in the deepest possible tree: one per key triplet plus the leaves.
pub const MAX_LAYERS: usize = MAX_KEY_LAYERS as usize + 1;

/// Node range reserved for one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSlot {
    pub offset: u32,
    pub capacity: u32,
}

impl LayerSlot {
    pub fn range(&self) -> Range<u32> {
        self.offset..self.offset + self.capacity
    }
}

/// Per-layer `(offset, capacity)` pairs for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTable {
    slots: Vec<LayerSlot>,
    total: u32,
}

impl LayerTable {
    pub fn new(max_particles: u32, key_layers: u32, unsorted_threshold: u32) -> ConfigResult<Self> {
        if key_layers == 0 || key_layers > MAX_KEY_LAYERS {
            return Err(ConfigError::InvalidParameter {
                name: "key_layers",
                value: key_layers.to_string(),
                reason: "must be in 1..=21",
            });
        }

        let n = max_particles as u64;
        let cells = |layers_above_leaf: u32| {
            (BRANCHING_FACTOR as u64)
                .checked_pow(key_layers - layers_above_leaf)
                .unwrap_or(u64::MAX)
        };

        let mut slots = Vec::with_capacity(key_layers as usize + 1);
        let mut offset = 0u64;
        for layer in 0..=key_layers {
            let capacity = if layer == 0 {
                n.min(cells(0).max(unsorted_threshold as u64))
            } else {
                n.min(cells(layer))
            };
            // u32::MAX is the empty child slot, so the arena must stay below it.
            if offset + capacity >= u32::MAX as u64 {
                return Err(ConfigError::ArenaTooLarge {
                    nodes: offset + capacity,
                });
            }
            slots.push(LayerSlot {
                offset: offset as u32,
                capacity: capacity as u32,
            });
            offset += capacity;
        }

        Ok(Self {
            slots,
            total: offset as u32,
        })
    }

    pub fn from_config(config: &SimulationConfig) -> ConfigResult<Self> {
        Self::new(
            config.max_particles,
            config.key_layers,
            config.unsorted_threshold,
        )
    }

    /// Number of layers, leaves included.
    pub fn layer_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn slots(&self) -> &[LayerSlot] {
        &self.slots
    }

    pub fn slot(&self, layer: u32) -> Option<LayerSlot> {
        self.slots.get(layer as usize).copied()
    }

    /// Size of the whole arena in nodes.
    pub fn total_nodes(&self) -> u32 {
        self.total
    }

    /// Layer that owns arena index `node`.
    pub fn layer_of(&self, node: u32) -> Option<u32> {
        self.slots
            .iter()
            .position(|slot| slot.range().contains(&node))
            .map(|layer| layer as u32)
    }

    /// Table packed as `vec4<u32>(offset, capacity, 0, 0)` rows for a uniform buffer.
    pub fn to_uniform(&self) -> [[u32; 4]; MAX_LAYERS] {
        let mut rows = [[0u32; 4]; MAX_LAYERS];
        for (row, slot) in rows.iter_mut().zip(&self.slots) {
            *row = [slot.offset, slot.capacity, 0, 0];
        }
        rows
    }
}
