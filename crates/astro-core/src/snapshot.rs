//! Host copy of a GPU-built tree, and the structural checks run against it.

use std::ops::Range;

use serde::Serialize;

use crate::error::InvariantViolation;
use crate::layers::LayerTable;
use crate::morton::{KeyQuantizer, SpatialKey};
use crate::node::{TreeNode, NO_CHILD};
use crate::particle::PositionMass;

/// A tree read back from the GPU after a build.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// The whole node arena, stale slots included.
    pub nodes: Vec<TreeNode>,
    pub table: LayerTable,
    /// Live nodes per layer; layers above `top_layer` are 0.
    pub layer_counts: Vec<u32>,
    /// Highest layer the build produced.
    pub top_layer: u32,
    /// First layer that produced more runs than its capacity, if any.
    pub overflow_layer: Option<u32>,
    /// Leaves were built one per particle without sorting.
    pub singleton_leaves: bool,
    /// Arena index of each particle's leaf.
    pub leaf_of: Vec<u32>,
}

/// Summary of a snapshot that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TreeStats {
    pub node_count: u32,
    pub leaf_count: u32,
    pub root_count: u32,
    pub top_layer: u32,
    pub total_mass: f64,
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl TreeSnapshot {
    /// Arena range of the live nodes of `layer`.
    pub fn layer_range(&self, layer: u32) -> Range<usize> {
        let Some(slot) = self.table.slot(layer) else {
            return 0..0;
        };
        let count = self
            .layer_counts
            .get(layer as usize)
            .copied()
            .unwrap_or(0)
            .min(slot.capacity);
        slot.offset as usize..(slot.offset + count) as usize
    }

    pub fn layer(&self, layer: u32) -> &[TreeNode] {
        self.nodes.get(self.layer_range(layer)).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[TreeNode] {
        self.layer(self.top_layer)
    }

    pub fn node(&self, index: u32) -> Option<&TreeNode> {
        self.nodes.get(index as usize)
    }

    pub fn node_count(&self) -> u32 {
        (0..=self.top_layer)
            .map(|layer| self.layer_range(layer).len() as u32)
            .sum()
    }

    pub fn total_mass(&self) -> f64 {
        self.roots().iter().map(|n| n.mass as f64).sum()
    }

    /// Check the structure of every live layer.
    ///
    /// `tolerance` is relative, applied to mass and light sums, and to both
    /// centers scaled by the mean distance of the children from the origin.
    pub fn validate(&self, tolerance: f64) -> Result<TreeStats, InvariantViolation> {
        if let Some(layer) = self.overflow_layer {
            let capacity = self.table.slot(layer).map_or(0, |slot| slot.capacity);
            return Err(InvariantViolation::LayerOverflow { layer, capacity });
        }

        for layer in 0..=self.top_layer {
            if layer == 0 && self.singleton_leaves {
                continue;
            }
            let range = self.layer_range(layer);
            for index in range.clone().skip(1) {
                if self.nodes[index].key() <= self.nodes[index - 1].key() {
                    return Err(InvariantViolation::UnorderedLayer {
                        layer,
                        node: index as u32,
                    });
                }
            }
        }

        let leaf_members: u64 = self.layer(0).iter().map(|n| n.member_count as u64).sum();
        if leaf_members != self.leaf_of.len() as u64 {
            return Err(InvariantViolation::MemberCountMismatch {
                found: leaf_members,
                expected: self.leaf_of.len() as u64,
            });
        }

        for layer in 1..=self.top_layer {
            let below = self.layer_range(layer - 1);
            for index in self.layer_range(layer) {
                self.check_internal(index as u32, &below, tolerance)?;
            }
        }

        let root_members: u64 = self.roots().iter().map(|n| n.member_count as u64).sum();
        if root_members != self.leaf_of.len() as u64 {
            return Err(InvariantViolation::MemberCountMismatch {
                found: root_members,
                expected: self.leaf_of.len() as u64,
            });
        }

        Ok(TreeStats {
            node_count: self.node_count(),
            leaf_count: self.layer_range(0).len() as u32,
            root_count: self.roots().len() as u32,
            top_layer: self.top_layer,
            total_mass: self.total_mass(),
        })
    }

    fn check_internal(
        &self,
        index: u32,
        below: &Range<usize>,
        tolerance: f64,
    ) -> Result<(), InvariantViolation> {
        let node = &self.nodes[index as usize];
        let mut mass = 0.0f64;
        let mut weighted = [0.0f64; 3];
        let mut spread = 0.0f64;
        let mut light = [0.0f64; 4];
        let mut light_weighted = [0.0f64; 3];
        let mut light_spread = 0.0f64;
        let mut members = 0u64;

        for child_index in node.children() {
            if !below.contains(&(child_index as usize)) {
                return Err(InvariantViolation::ChildOutOfLayer {
                    node: index,
                    child: child_index,
                    expected_layer: node.layer.saturating_sub(1),
                });
            }
            let child = &self.nodes[child_index as usize];
            if child.parent != index {
                return Err(InvariantViolation::BrokenParentLink {
                    child: child_index,
                    found: child.parent,
                    expected: index,
                });
            }
            if child.key().0 >> 3 != node.key().0 {
                return Err(InvariantViolation::KeyPrefixMismatch {
                    child: child_index,
                    child_key: child.key().0,
                    parent_key: node.key().0,
                });
            }

            let m = child.mass as f64;
            let c = child.center_of_mass.map(f64::from);
            mass += m;
            for axis in 0..3 {
                weighted[axis] += c[axis] * m;
            }
            spread += norm(c) * m;

            let e = child.emitted.map(f64::from);
            let lc = child.emitted_center.map(f64::from);
            for channel in 0..4 {
                light[channel] += e[channel];
            }
            for axis in 0..3 {
                light_weighted[axis] += lc[axis] * e[3];
            }
            light_spread += norm(lc) * e[3];
            members += child.member_count as u64;
        }

        if (node.mass as f64 - mass).abs() > tolerance * mass.abs().max(f64::MIN_POSITIVE) {
            return Err(InvariantViolation::MassMismatch {
                node: index,
                mass: node.mass,
                children: mass,
            });
        }

        if mass > 0.0 {
            let expected = weighted.map(|w| w / mass);
            let com = node.center_of_mass.map(f64::from);
            let error = norm([
                com[0] - expected[0],
                com[1] - expected[1],
                com[2] - expected[2],
            ]);
            if error > tolerance * (1.0 + spread / mass) {
                return Err(InvariantViolation::CenterMismatch { node: index, error });
            }
        }

        let emitted = node.emitted.map(f64::from);
        let light_error = (0..4)
            .map(|channel| {
                (emitted[channel] - light[channel]).abs()
                    / light[channel].abs().max(f64::MIN_POSITIVE)
            })
            .fold(0.0, f64::max);
        if light_error > tolerance {
            return Err(InvariantViolation::EmissionMismatch {
                node: index,
                error: light_error,
            });
        }

        if light[3] > 0.0 {
            let expected = light_weighted.map(|w| w / light[3]);
            let center = node.emitted_center.map(f64::from);
            let error = norm([
                center[0] - expected[0],
                center[1] - expected[1],
                center[2] - expected[2],
            ]);
            if error > tolerance * (1.0 + light_spread / light[3]) {
                return Err(InvariantViolation::EmissionCenterMismatch { node: index, error });
            }
        }

        if members != node.member_count as u64 {
            return Err(InvariantViolation::MemberCountMismatch {
                found: node.member_count as u64,
                expected: members,
            });
        }
        Ok(())
    }

    /// Check that every particle hangs off a live leaf carrying its own key.
    pub fn validate_leaves(
        &self,
        particles: &[PositionMass],
        quantizer: &KeyQuantizer,
        key_layers: u32,
    ) -> Result<(), InvariantViolation> {
        if particles.len() != self.leaf_of.len() {
            return Err(InvariantViolation::MemberCountMismatch {
                found: self.leaf_of.len() as u64,
                expected: particles.len() as u64,
            });
        }

        let leaves = self.layer_range(0);
        let mut counts = vec![0u32; leaves.len()];
        for (particle, (&leaf, pm)) in self.leaf_of.iter().zip(particles).enumerate() {
            if leaf == NO_CHILD || !leaves.contains(&(leaf as usize)) {
                return Err(InvariantViolation::DanglingLeaf {
                    particle: particle as u32,
                    leaf,
                });
            }
            let particle_key = SpatialKey::from_position(pm.position, quantizer, key_layers);
            let leaf_key = self.nodes[leaf as usize].key();
            if particle_key != leaf_key {
                return Err(InvariantViolation::LeafKeyMismatch {
                    particle: particle as u32,
                    leaf,
                    particle_key: particle_key.0,
                    leaf_key: leaf_key.0,
                });
            }
            counts[leaf as usize - leaves.start] += 1;
        }

        for (node, &count) in self.layer(0).iter().zip(&counts) {
            if node.member_count != count {
                return Err(InvariantViolation::MemberCountMismatch {
                    found: node.member_count as u64,
                    expected: count as u64,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particles() -> Vec<PositionMass> {
        vec![
            PositionMass {
                position: [-0.5, -0.5, -0.5],
                mass: 1.0,
            },
            PositionMass {
                position: [0.5, -0.5, -0.5],
                mass: 2.0,
            },
            PositionMass {
                position: [0.6, -0.4, -0.4],
                mass: 1.0,
            },
        ]
    }

    fn mean(points: &[([f32; 3], f32)]) -> [f32; 3] {
        let mass: f32 = points.iter().map(|(_, m)| m).sum();
        let mut out = [0.0; 3];
        for (p, m) in points {
            for axis in 0..3 {
                out[axis] += p[axis] * m / mass;
            }
        }
        out
    }

    /// Three particles, one key layer: leaf 0 holds particle 0, leaf 1 holds
    /// particles 1 and 2, and node 3 is the root. Particles 0 and 2 are stars
    /// of intensity 1 and 2.
    fn snapshot() -> TreeSnapshot {
        let ps = particles();
        let table = LayerTable::new(3, 1, 0).unwrap();
        let leaf1_com = mean(&[(ps[1].position, 2.0), (ps[2].position, 1.0)]);
        let root_com = mean(&[(ps[0].position, 1.0), (leaf1_com, 3.0)]);
        let root_light_center = mean(&[(ps[0].position, 1.0), (ps[2].position, 2.0)]);

        let mut root_children = [NO_CHILD; 8];
        root_children[0] = 0;
        root_children[1] = 1;
        let nodes = vec![
            TreeNode {
                center_of_mass: ps[0].position,
                mass: 1.0,
                emitted: [1.0, 1.0, 1.0, 1.0],
                emitted_center: ps[0].position,
                key: [0, 0],
                member_count: 1,
                parent: 3,
                ..Default::default()
            },
            TreeNode {
                center_of_mass: leaf1_com,
                mass: 3.0,
                emitted: [2.0, 1.0, 0.5, 2.0],
                emitted_center: ps[2].position,
                key: [1, 0],
                member_count: 2,
                parent: 3,
                ..Default::default()
            },
            // Stale slot from an earlier frame.
            TreeNode {
                mass: 99.0,
                ..Default::default()
            },
            TreeNode {
                center_of_mass: root_com,
                mass: 4.0,
                emitted: [3.0, 2.0, 1.5, 3.0],
                emitted_center: root_light_center,
                layer: 1,
                key: [0, 0],
                member_count: 3,
                children: root_children,
                ..Default::default()
            },
        ];

        TreeSnapshot {
            nodes,
            table,
            layer_counts: vec![2, 1],
            top_layer: 1,
            overflow_layer: None,
            singleton_leaves: false,
            leaf_of: vec![0, 1, 1],
        }
    }

    #[test]
    fn test_valid_tree() {
        let tree = snapshot();
        let stats = tree.validate(1e-5).unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.leaf_count, 2);
        assert_eq!(stats.root_count, 1);
        assert_eq!(stats.total_mass, 4.0);
        tree.validate_leaves(&particles(), &KeyQuantizer::new(1.0), 1)
            .unwrap();
    }

    #[test]
    fn test_mass_mismatch() {
        let mut tree = snapshot();
        tree.nodes[3].mass = 4.5;
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::MassMismatch { node: 3, .. })
        ));
    }

    #[test]
    fn test_center_mismatch() {
        let mut tree = snapshot();
        tree.nodes[3].center_of_mass[0] += 0.1;
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::CenterMismatch { node: 3, .. })
        ));
    }

    #[test]
    fn test_emission_mismatch() {
        let mut tree = snapshot();
        tree.nodes[3].emitted[1] = 2.5;
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::EmissionMismatch { node: 3, .. })
        ));

        // Darkening a leaf breaks its parent's sum, not the leaf itself.
        let mut tree = snapshot();
        tree.nodes[0].emitted = [0.0; 4];
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::EmissionMismatch { node: 3, .. })
        ));
    }

    #[test]
    fn test_emission_center_mismatch() {
        let mut tree = snapshot();
        // The mass-weighted center is not the light-weighted one.
        tree.nodes[3].emitted_center = tree.nodes[3].center_of_mass;
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::EmissionCenterMismatch { node: 3, .. })
        ));

        // Without emitters the light center is not checked.
        let mut tree = snapshot();
        for node in &mut tree.nodes {
            node.emitted = [0.0; 4];
            node.emitted_center = [7.0; 3];
        }
        tree.validate(1e-5).unwrap();
    }

    #[test]
    fn test_broken_links() {
        let mut tree = snapshot();
        tree.nodes[1].parent = NO_CHILD;
        assert_eq!(
            tree.validate(1e-5),
            Err(InvariantViolation::BrokenParentLink {
                child: 1,
                found: NO_CHILD,
                expected: 3
            })
        );

        let mut tree = snapshot();
        tree.nodes[3].children[1] = 2;
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::ChildOutOfLayer { child: 2, .. })
        ));
    }

    #[test]
    fn test_key_prefix_and_order() {
        let mut tree = snapshot();
        tree.nodes[1].key = [9, 0];
        assert!(matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::KeyPrefixMismatch { child: 1, .. })
        ));

        let mut tree = snapshot();
        tree.nodes[1].key = [0, 0];
        assert_eq!(
            tree.validate(1e-5),
            Err(InvariantViolation::UnorderedLayer { layer: 0, node: 1 })
        );

        // Singleton leaves are never sorted, so duplicate keys are fine there.
        tree.singleton_leaves = true;
        assert!(!matches!(
            tree.validate(1e-5),
            Err(InvariantViolation::UnorderedLayer { .. })
        ));
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut tree = snapshot();
        tree.overflow_layer = Some(0);
        tree.layer_counts = vec![3, 1];
        assert_eq!(
            tree.validate(1e-5),
            Err(InvariantViolation::LayerOverflow {
                layer: 0,
                capacity: 3
            })
        );
    }

    #[test]
    fn test_overflow_names_the_recorded_layer() {
        // Layer 0 is legitimately full; the overflow happened above it.
        let mut tree = snapshot();
        tree.overflow_layer = Some(1);
        tree.layer_counts = vec![3, 1];
        assert_eq!(
            tree.validate(1e-5),
            Err(InvariantViolation::LayerOverflow {
                layer: 1,
                capacity: 1
            })
        );
    }

    #[test]
    fn test_leaf_checks() {
        let q = KeyQuantizer::new(1.0);
        let mut tree = snapshot();
        tree.leaf_of[2] = 0;
        assert!(matches!(
            tree.validate_leaves(&particles(), &q, 1),
            Err(InvariantViolation::LeafKeyMismatch { particle: 2, .. })
        ));

        let mut tree = snapshot();
        tree.leaf_of[0] = 2;
        assert_eq!(
            tree.validate_leaves(&particles(), &q, 1),
            Err(InvariantViolation::DanglingLeaf {
                particle: 0,
                leaf: 2
            })
        );

        let mut tree = snapshot();
        tree.nodes[1].member_count = 5;
        assert!(matches!(
            tree.validate_leaves(&particles(), &q, 1),
            Err(InvariantViolation::MemberCountMismatch { .. })
        ));
    }
}
