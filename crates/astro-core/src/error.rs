//! Error types for configuration and tree validation.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while validating or loading a [`SimulationConfig`](crate::SimulationConfig).
///
/// All of these are fatal at initialization: they describe a run that cannot be
/// sized correctly, not a condition that can change from frame to frame.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A scalar parameter is outside its accepted range.
    #[error("invalid {name}: {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    /// More particles were supplied than the run was sized for.
    #[error("particle count {count} exceeds configured maximum {max}")]
    TooManyParticles { count: usize, max: u32 },

    /// A run needs at least one particle.
    #[error("particle set is empty")]
    EmptyParticleSet,

    /// The node arena would not fit in 32-bit node indices.
    #[error("layer table needs {nodes} nodes, more than a u32 index can address")]
    ArenaTooLarge { nodes: u64 },

    /// Configuration text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A broken structural invariant found in a tree read back from the GPU.
#[derive(Debug, Error, PartialEq)]
pub enum InvariantViolation {
    /// The builder produced more nodes than the layer table reserves.
    #[error("layer {layer} overflowed its capacity of {capacity} nodes")]
    LayerOverflow { layer: u32, capacity: u32 },

    /// A node's mass is not the sum of its children's masses.
    #[error("node {node}: mass {mass} differs from children sum {children}")]
    MassMismatch { node: u32, mass: f32, children: f64 },

    /// A node's center of mass is not the weighted mean of its children.
    #[error("node {node}: center of mass off by {error}")]
    CenterMismatch { node: u32, error: f64 },

    /// A node's emitted light is not the sum of its children's.
    #[error("node {node}: emitted light off by {error} relative to children sum")]
    EmissionMismatch { node: u32, error: f64 },

    /// A node's light center is not the intensity-weighted mean of its children's.
    #[error("node {node}: light center off by {error}")]
    EmissionCenterMismatch { node: u32, error: f64 },

    /// A child slot points outside the layer directly below its parent.
    #[error("node {node}: child {child} is not in layer {expected_layer}")]
    ChildOutOfLayer {
        node: u32,
        child: u32,
        expected_layer: u32,
    },

    /// A child's parent link does not point back at its parent.
    #[error("node {child}: parent link {found} should be {expected}")]
    BrokenParentLink { child: u32, found: u32, expected: u32 },

    /// A child's key does not refine its parent's key.
    #[error("node {child}: key {child_key:#x} is not a refinement of parent key {parent_key:#x}")]
    KeyPrefixMismatch {
        child: u32,
        child_key: u64,
        parent_key: u64,
    },

    /// Keys within a layer are not strictly increasing.
    #[error("layer {layer}: node {node} is out of key order")]
    UnorderedLayer { layer: u32, node: u32 },

    /// A particle is attached to a leaf that does not match its own key.
    #[error("particle {particle}: key {particle_key:#x} does not match leaf {leaf} key {leaf_key:#x}")]
    LeafKeyMismatch {
        particle: u32,
        leaf: u32,
        particle_key: u64,
        leaf_key: u64,
    },

    /// A particle is attached to something that is not a live leaf.
    #[error("particle {particle}: leaf index {leaf} is not a live leaf")]
    DanglingLeaf { particle: u32, leaf: u32 },

    /// Leaf member counts do not add up to the particle count.
    #[error("leaves hold {found} particles, expected {expected}")]
    MemberCountMismatch { found: u64, expected: u64 },
}
