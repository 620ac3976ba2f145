//! Host-side data model for the GPU Barnes-Hut gravity pipeline.
//!
//! Everything the GPU crate uploads or reads back is defined here, byte for
//! byte, together with the host mirrors used to check its output:
//!
//! - [`particle`]: per-particle records and the structure-of-arrays [`ParticleSet`]
//! - [`morton`]: Morton keys, bit-identical to the key kernel
//! - [`layers`]: the fixed per-layer node ranges of the tree arena
//! - [`node`]: tree nodes, sort entries and force samples
//! - [`snapshot`]: structural validation of a tree read back from the GPU
//! - [`config`]: run configuration
//!
//! This crate has no GPU dependency and can be used to prepare populations
//! or inspect trees offline.

pub mod config;
pub mod error;
pub mod layers;
pub mod morton;
pub mod node;
pub mod particle;
pub mod snapshot;

pub use config::{SimulationConfig, MAX_PARTICLES, MAX_STACK_CAPACITY};
pub use error::{ConfigError, ConfigResult, InvariantViolation};
pub use layers::{LayerSlot, LayerTable, MAX_LAYERS};
pub use morton::{KeyQuantizer, SpatialKey, AXIS_BITS, BRANCHING_FACTOR, MAX_KEY_LAYERS};
pub use node::{ForceSample, SortEntry, TreeNode, NO_CHILD};
pub use particle::{ColorType, Particle, ParticleKind, ParticleSet, PositionMass, VelocityRadius};
pub use snapshot::{TreeSnapshot, TreeStats};
