//! Error types for GPU gravity operations.

use astro_core::{ConfigError, InvariantViolation};
use thiserror::Error;

/// Errors that can occur while setting up or reading back the gravity pipeline.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Failed to initialize GPU device.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// Failed to read back data from GPU.
    #[error("GPU readback failed: {0}")]
    Readback(String),

    /// The run configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A buffer would be larger than the device allows.
    #[error("{what} needs {bytes} bytes, device limit is {limit}")]
    CapacityExceeded {
        what: &'static str,
        bytes: u64,
        limit: u64,
    },

    /// A dispatch would need more work-groups than the device allows.
    #[error("{what} needs {groups} work-groups, device limit is {limit}")]
    TooManyWorkgroups {
        what: &'static str,
        groups: u32,
        limit: u32,
    },

    /// Input data does not fit the resources it is written to.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A tree read back from the GPU is structurally broken.
    #[error("tree invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}
