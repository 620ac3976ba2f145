//! Tree and force records shared with the GPU.

use crate::morton::SpatialKey;

/// Marks an empty child slot or a missing parent.
pub const NO_CHILD: u32 = u32::MAX;

/// A (key, index) pair as carried through sorting and compaction.
///
/// At the leaf layer `index` is a particle index; at internal layers it is
/// the arena index of the node being grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SortEntry {
    /// Key as `[lo, hi]` words.
    pub key: [u32; 2],
    pub index: u32,
}

impl SortEntry {
    pub fn new(key: SpatialKey, index: u32) -> Self {
        Self {
            key: key.words(),
            index,
        }
    }

    pub fn key(&self) -> SpatialKey {
        SpatialKey::from_words(self.key)
    }
}

/// One node of the layered tree.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct TreeNode {
    pub center_of_mass: [f32; 3],
    pub mass: f32,
    /// `rgb` = sum of color * intensity, `a` = sum of intensity.
    pub emitted: [f32; 4],
    /// Intensity-weighted position of the emitters below this node.
    pub emitted_center: [f32; 3],
    /// 0 for leaves.
    pub layer: u32,
    /// Key prefix at this node's layer, as `[lo, hi]`.
    pub key: [u32; 2],
    /// Particles below this node.
    pub member_count: u32,
    /// Arena index of the parent, or [`NO_CHILD`] for a root.
    pub parent: u32,
    /// Arena indices of the children in the layer below, or [`NO_CHILD`].
    pub children: [u32; 8],
}

impl Default for TreeNode {
    fn default() -> Self {
        Self {
            center_of_mass: [0.0; 3],
            mass: 0.0,
            emitted: [0.0; 4],
            emitted_center: [0.0; 3],
            layer: 0,
            key: [0; 2],
            member_count: 0,
            parent: NO_CHILD,
            children: [NO_CHILD; 8],
        }
    }
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.layer == 0
    }

    pub fn key(&self) -> SpatialKey {
        SpatialKey::from_words(self.key)
    }

    /// Occupied child slots.
    pub fn children(&self) -> impl Iterator<Item = u32> + '_ {
        self.children.iter().copied().filter(|&c| c != NO_CHILD)
    }

    pub fn child_count(&self) -> usize {
        self.children().count()
    }
}

/// Per-particle output of the force pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ForceSample {
    pub force: [f32; 3],
    /// Nodes opened or accepted while evaluating this particle.
    pub visited: u32,
    /// Point light received from emitters.
    pub light: [f32; 3],
    /// Times the traversal stack was full and a node was taken whole.
    pub truncated: u32,
}

impl ForceSample {
    pub fn magnitude(&self) -> f32 {
        let [x, y, z] = self.force;
        (x * x + y * y + z * z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.force.iter().chain(&self.light).all(|v| v.is_finite())
    }
}
