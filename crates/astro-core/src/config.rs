//! Run configuration for the gravity pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::layers::LayerTable;
use crate::morton::{KeyQuantizer, MAX_KEY_LAYERS};

/// Largest particle count a single 1D dispatch of 256-wide work-groups covers.
pub const MAX_PARTICLES: u32 = 65_535 * 256;

/// Largest traversal stack the force kernel will allocate per invocation.
pub const MAX_STACK_CAPACITY: u32 = 512;

/// Configuration for one simulation run.
///
/// Everything here is fixed once the GPU resources are sized, except the
/// force parameters (`theta`, `softening`, `max_force`,
/// `gravitational_constant`) and the integration step (`dt`, `damping`),
/// which can be pushed again at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Upper bound on the particle count; sizes every buffer and the layer table.
    pub max_particles: u32,
    /// Tree depth below the root (1..=21). Leaves are cells of
    /// `2 * world_half_extent / 2^key_layers`.
    pub key_layers: u32,
    /// Barnes-Hut opening angle. 0 descends to every leaf.
    pub theta: f32,
    /// Softening length added in quadrature to every distance.
    pub softening: f32,
    /// Maximum magnitude of the per-particle force.
    pub max_force: f32,
    /// Gravitational constant.
    pub gravitational_constant: f32,
    /// Time step per frame.
    pub dt: f32,
    /// Fraction of velocity removed each step (0-1).
    pub damping: f32,
    /// Half the side of the cube keys are quantized over, centered on the origin.
    pub world_half_extent: f32,
    /// Below this particle count the sort is skipped and every particle is its own leaf.
    pub unsorted_threshold: u32,
    /// Re-sort every internal layer instead of relying on inherited order.
    pub resort_internal_layers: bool,
    /// Entries in the per-particle traversal stack.
    pub stack_capacity: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_particles: 65_536,
            key_layers: 8,
            theta: 0.7,
            softening: 0.05,
            max_force: 1.0e4,
            gravitational_constant: 1.0,
            dt: 0.01,
            damping: 0.001,
            world_half_extent: 100.0,
            unsorted_threshold: 256,
            resort_internal_layers: false,
            stack_capacity: 64,
        }
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &'static str) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        value: value.to_string(),
        reason,
    }
}

fn positive(name: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, value, "must be finite and > 0"))
    }
}

impl SimulationConfig {
    /// Parse a JSON document and validate it. Missing fields take their defaults.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every scalar and that the node arena is addressable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_particles == 0 || self.max_particles > MAX_PARTICLES {
            return Err(invalid(
                "max_particles",
                self.max_particles,
                "must be in 1..=16776960",
            ));
        }
        if self.key_layers == 0 || self.key_layers > MAX_KEY_LAYERS {
            return Err(invalid("key_layers", self.key_layers, "must be in 1..=21"));
        }
        if !self.theta.is_finite() || self.theta < 0.0 {
            return Err(invalid("theta", self.theta, "must be finite and >= 0"));
        }
        positive("softening", self.softening)?;
        positive("max_force", self.max_force)?;
        positive("dt", self.dt)?;
        positive("world_half_extent", self.world_half_extent)?;
        if !self.gravitational_constant.is_finite() {
            return Err(invalid(
                "gravitational_constant",
                self.gravitational_constant,
                "must be finite",
            ));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(invalid("damping", self.damping, "must be in [0, 1)"));
        }
        if self.stack_capacity == 0 || self.stack_capacity > MAX_STACK_CAPACITY {
            return Err(invalid(
                "stack_capacity",
                self.stack_capacity,
                "must be in 1..=512",
            ));
        }

        if self.theta > 1.5 {
            tracing::warn!(
                theta = self.theta,
                "opening angle above 1.5 gives very coarse forces"
            );
        }

        LayerTable::from_config(self).map(|_| ())
    }

    /// Reject a particle count this run was not sized for.
    pub fn check_particle_count(&self, count: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::EmptyParticleSet);
        }
        if count > self.max_particles as usize {
            return Err(ConfigError::TooManyParticles {
                count,
                max: self.max_particles,
            });
        }
        Ok(())
    }

    /// Whether `particle_count` takes the unsorted singleton-leaf path.
    pub fn uses_shortcut(&self, particle_count: u32) -> bool {
        particle_count < self.unsorted_threshold
    }

    pub fn quantizer(&self) -> KeyQuantizer {
        KeyQuantizer::new(self.world_half_extent)
    }

    /// Side length of a leaf cell.
    pub fn leaf_cell_size(&self) -> f32 {
        2.0 * self.world_half_extent / (1u64 << self.key_layers) as f32
    }

    /// Side length of a node cell at `layer` (0 = leaf).
    pub fn layer_extent(&self, layer: u32) -> f32 {
        self.leaf_cell_size() * (1u64 << layer.min(MAX_KEY_LAYERS)) as f32
    }

    /// Significant bits in a leaf key.
    pub fn key_bits(&self) -> u32 {
        3 * self.key_layers
    }

    pub fn layer_table(&self) -> ConfigResult<LayerTable> {
        LayerTable::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.key_bits(), 24);
        assert!(config.theta > 0.0);
    }

    #[test]
    fn test_rejects_bad_scalars() {
        let cases: Vec<(&str, SimulationConfig)> = vec![
            (
                "key_layers",
                SimulationConfig {
                    key_layers: 22,
                    ..Default::default()
                },
            ),
            (
                "softening",
                SimulationConfig {
                    softening: 0.0,
                    ..Default::default()
                },
            ),
            (
                "damping",
                SimulationConfig {
                    damping: 1.0,
                    ..Default::default()
                },
            ),
            (
                "theta",
                SimulationConfig {
                    theta: f32::NAN,
                    ..Default::default()
                },
            ),
            (
                "stack_capacity",
                SimulationConfig {
                    stack_capacity: 0,
                    ..Default::default()
                },
            ),
            (
                "max_particles",
                SimulationConfig {
                    max_particles: 0,
                    ..Default::default()
                },
            ),
        ];

        for (field, config) in cases {
            match config.validate() {
                Err(ConfigError::InvalidParameter { name, .. }) => assert_eq!(name, field),
                other => panic!("{field}: expected InvalidParameter, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_particle_count_bounds() {
        let config = SimulationConfig {
            max_particles: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.check_particle_count(0),
            Err(ConfigError::EmptyParticleSet)
        ));
        assert!(config.check_particle_count(10).is_ok());
        assert!(matches!(
            config.check_particle_count(11),
            Err(ConfigError::TooManyParticles { count: 11, max: 10 })
        ));
    }

    #[test]
    fn test_cell_geometry() {
        let config = SimulationConfig {
            world_half_extent: 8.0,
            key_layers: 4,
            ..Default::default()
        };
        assert_eq!(config.leaf_cell_size(), 1.0);
        assert_eq!(config.layer_extent(0), 1.0);
        assert_eq!(config.layer_extent(4), 16.0);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SimulationConfig::from_json(r#"{ "theta": 0.3, "key_layers": 6 }"#).unwrap();
        assert_eq!(config.theta, 0.3);
        assert_eq!(config.key_layers, 6);
        assert_eq!(config.max_particles, SimulationConfig::default().max_particles);

        let back = SimulationConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            SimulationConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json(r#"{ "dt": -1.0 }"#),
            Err(ConfigError::InvalidParameter { name: "dt", .. })
        ));
    }

    #[test]
    fn test_shortcut_threshold() {
        let config = SimulationConfig {
            unsorted_threshold: 100,
            ..Default::default()
        };
        assert!(config.uses_shortcut(99));
        assert!(!config.uses_shortcut(100));
    }
}
