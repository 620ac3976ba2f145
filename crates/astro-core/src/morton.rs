//! Morton (Z-order) spatial keys.
//!
//! Positions are offset into a non-negative cube, quantized to 21 bits per
//! axis and interleaved into a 63-bit key: bit `3k + 0/1/2` holds bit `k` of
//! x/y/z. A run keeps only the top `3 * key_layers` bits, so two particles
//! in the same leaf cell share a key and each coarser layer is the key shifted
//! right by three.
//!
//! This is the host mirror of the GPU key kernel. Both sides quantize with a
//! multiply by a precomputed scale (never a divide) so they agree bit for bit.

use serde::{Deserialize, Serialize};

/// Bits of resolution per axis.
pub const AXIS_BITS: u32 = 21;
/// Largest quantized coordinate.
pub const AXIS_MAX: u32 = (1 << AXIS_BITS) - 1;
/// Deepest tree a 64-bit key can describe.
pub const MAX_KEY_LAYERS: u32 = AXIS_BITS;
/// Children per node.
pub const BRANCHING_FACTOR: u32 = 8;

/// Maps world coordinates onto the quantization grid.
///
/// Coordinates outside `[-half_extent, half_extent)` clamp to the edge cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyQuantizer {
    pub half_extent: f32,
    pub scale: f32,
}

impl KeyQuantizer {
    pub fn new(half_extent: f32) -> Self {
        Self {
            half_extent,
            scale: (1u32 << AXIS_BITS) as f32 / (2.0 * half_extent),
        }
    }

    /// Quantize one coordinate to `[0, AXIS_MAX]`.
    pub fn quantize(&self, coord: f32) -> u32 {
        let scaled = (coord + self.half_extent) * self.scale;
        // NaN falls through both comparisons and casts to 0.
        scaled.clamp(0.0, AXIS_MAX as f32) as u32
    }

    pub fn quantize_position(&self, position: [f32; 3]) -> [u32; 3] {
        position.map(|c| self.quantize(c))
    }
}

/// A Morton key, possibly truncated to a tree depth.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SpatialKey(pub u64);

impl SpatialKey {
    /// Leaf key of a position for a tree with `key_layers` layers.
    pub fn from_position(position: [f32; 3], quantizer: &KeyQuantizer, key_layers: u32) -> Self {
        let [x, y, z] = quantizer.quantize_position(position);
        Self(interleave(x, y, z)).truncate(key_layers)
    }

    /// Drop the low triplets so only `key_layers` levels remain.
    pub fn truncate(self, key_layers: u32) -> Self {
        let layers = key_layers.min(MAX_KEY_LAYERS);
        Self(self.0 >> (3 * (MAX_KEY_LAYERS - layers)))
    }

    /// Key of the ancestor `layers` levels up.
    pub fn at_layer(self, layers: u32) -> Self {
        if layers >= 22 {
            return Self(0);
        }
        Self(self.0 >> (3 * layers))
    }

    /// Split back into per-axis cell coordinates.
    pub fn cell(self) -> [u32; 3] {
        deinterleave(self.0)
    }

    /// Key words as `[lo, hi]`, the layout the GPU uses.
    pub fn words(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }

    pub fn from_words(words: [u32; 2]) -> Self {
        Self(words[0] as u64 | (words[1] as u64) << 32)
    }
}

impl From<u64> for SpatialKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Spread the low 21 bits of `v` so that bit `k` lands on bit `3k`.
fn spread(v: u32) -> u64 {
    let mut x = (v & AXIS_MAX) as u64;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of [`spread`].
fn compact(v: u64) -> u32 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x ^ (x >> 32)) & AXIS_MAX as u64;
    x as u32
}

/// Interleave three 21-bit coordinates into a 63-bit key.
pub fn interleave(x: u32, y: u32, z: u32) -> u64 {
    spread(x) | spread(y) << 1 | spread(z) << 2
}

/// Recover the three coordinates from an interleaved key.
pub fn deinterleave(key: u64) -> [u32; 3] {
    [compact(key), compact(key >> 1), compact(key >> 2)]
}
