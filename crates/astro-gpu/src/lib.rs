//! GPU Barnes-Hut gravity for large particle systems using WebGPU.
//!
//! Every frame rebuilds an octree-like hierarchy on the GPU from Morton keys
//! and walks it once per particle. Positions never leave the device between
//! frames; readback exists only for diagnostics and tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Tree Build (GPU)                       │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Morton Keys │───▶│ Radix Sort  │───▶│   Layered   │      │
//! │  │ (per body)  │    │ (1 bit/pass)│    │ Compaction  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                           ▲  scan          │  per layer     │
//! │                           └────────────────┘                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Dynamics (GPU)                          │
//! │  ┌─────────────────────────┐    ┌─────────────────────┐     │
//! │  │  Barnes-Hut Traversal   │───▶│  Semi-implicit      │     │
//! │  │  (bounded stack, θ)     │    │  Euler + damping    │     │
//! │  └─────────────────────────┘    └─────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Diagnostics (optional)                     │
//! │  Particles, forces and the node arena copied back to CPU    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cost
//!
//! - Direct summation: O(n²) per frame
//! - Tree build: O(n · key bits) for the sort, O(n) per layer after it
//! - Traversal: O(n log n) for θ around 0.5-1.0
//!
//! ## Example
//!
//! ```no_run
//! use astro_core::{Particle, ParticleSet, SimulationConfig};
//! use astro_gpu::sync;
//!
//! let particles: ParticleSet = (0..1000)
//!     .map(|i| Particle::at_rest([i as f32 * 0.1, 0.0, 0.0], 1.0))
//!     .collect();
//! let mut simulation = sync::new_simulation(SimulationConfig::default(), &particles)?;
//! for _ in 0..100 {
//!     simulation.step();
//! }
//! assert_eq!(simulation.read_particles()?.len(), 1000);
//! # Ok::<(), astro_gpu::GpuError>(())
//! ```

mod error;
mod force;
mod gpu;
mod integrate;
mod keys;
mod scan;
mod shaders;
mod simulation;
mod sort;
mod tree;

pub use error::GpuError;
pub use force::{ForceEvaluator, ForceParams};
pub use gpu::{read_buffer, workgroups, CountBuffer, GpuContext, ParticleBuffers, WORKGROUP_SIZE};
pub use integrate::{IntegrateParams, Integrator};
pub use keys::{KeyGenerator, KeyParams};
pub use scan::{level_capacities, PrefixScan, SCAN_BLOCK};
pub use shaders::{compose, force_shader};
pub use simulation::{sync, GravitySimulation, TREE_TOLERANCE};
pub use sort::{RadixSorter, KEY_BITS};
pub use tree::{BuildState, TreeBuilder, TreeUniforms};

/// Result type for GPU gravity operations.
pub type Result<T> = std::result::Result<T, GpuError>;
