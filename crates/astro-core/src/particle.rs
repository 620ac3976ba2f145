//! Particle state records shared with the GPU.
//!
//! Particles live on the GPU as three parallel arrays so that each kernel binds
//! only the fields it touches. The structs here are byte-compatible with the
//! WGSL declarations of the same name.

use serde::{Deserialize, Serialize};

/// Position and mass of one particle.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PositionMass {
    pub position: [f32; 3],
    pub mass: f32,
}

/// Velocity and interaction radius of one particle.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct VelocityRadius {
    pub velocity: [f32; 3],
    pub radius: f32,
}

/// Emitted color and kind tag of one particle.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ColorType {
    /// RGB color; alpha is the emission intensity for stars.
    pub color: [f32; 4],
    /// A [`ParticleKind`] discriminant.
    pub kind: u32,
    pub _pad: [u32; 3],
}

impl ColorType {
    pub fn new(color: [f32; 4], kind: ParticleKind) -> Self {
        Self {
            color,
            kind: kind as u32,
            _pad: [0; 3],
        }
    }

    /// Decoded kind tag, `None` for an unknown discriminant.
    pub fn kind(&self) -> Option<ParticleKind> {
        ParticleKind::from_u32(self.kind)
    }

    /// Light this particle feeds into the tree: `(rgb * intensity, intensity)`.
    pub fn emission(&self) -> [f32; 4] {
        if self.kind() != Some(ParticleKind::Star) {
            return [0.0; 4];
        }
        let w = self.color[3];
        [self.color[0] * w, self.color[1] * w, self.color[2] * w, w]
    }
}

/// What a particle is, for lighting purposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ParticleKind {
    /// Emits light into the tree.
    Star = 0,
    /// Massive, does not emit.
    #[default]
    Planet = 1,
    /// Ambient material, does not emit.
    Dust = 2,
}

impl ParticleKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Star),
            1 => Some(Self::Planet),
            2 => Some(Self::Dust),
            _ => None,
        }
    }

    pub fn is_emissive(self) -> bool {
        self == Self::Star
    }
}

/// A particle in host-friendly form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: [f32; 3],
    pub mass: f32,
    pub velocity: [f32; 3],
    pub radius: f32,
    pub color: [f32; 4],
    pub kind: ParticleKind,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            mass: 1.0,
            velocity: [0.0; 3],
            radius: 1.0,
            color: [1.0; 4],
            kind: ParticleKind::Planet,
        }
    }
}

impl Particle {
    /// A non-emissive particle at rest.
    pub fn at_rest(position: [f32; 3], mass: f32) -> Self {
        Self {
            position,
            mass,
            ..Default::default()
        }
    }

    /// An emissive particle at rest.
    pub fn star(position: [f32; 3], mass: f32, color: [f32; 4]) -> Self {
        Self {
            position,
            mass,
            color,
            kind: ParticleKind::Star,
            ..Default::default()
        }
    }

    pub fn with_velocity(mut self, velocity: [f32; 3]) -> Self {
        self.velocity = velocity;
        self
    }
}

/// Structure-of-arrays particle population, laid out for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleSet {
    pub position_mass: Vec<PositionMass>,
    pub velocity_radius: Vec<VelocityRadius>,
    pub color_type: Vec<ColorType>,
}

impl ParticleSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            position_mass: Vec::with_capacity(capacity),
            velocity_radius: Vec::with_capacity(capacity),
            color_type: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, particle: Particle) {
        self.position_mass.push(PositionMass {
            position: particle.position,
            mass: particle.mass,
        });
        self.velocity_radius.push(VelocityRadius {
            velocity: particle.velocity,
            radius: particle.radius,
        });
        self.color_type
            .push(ColorType::new(particle.color, particle.kind));
    }

    pub fn len(&self) -> usize {
        self.position_mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position_mass.is_empty()
    }

    /// Reassemble particle `index`, if the three arrays agree on it.
    pub fn get(&self, index: usize) -> Option<Particle> {
        let pm = self.position_mass.get(index)?;
        let vr = self.velocity_radius.get(index)?;
        let ct = self.color_type.get(index)?;
        Some(Particle {
            position: pm.position,
            mass: pm.mass,
            velocity: vr.velocity,
            radius: vr.radius,
            color: ct.color,
            kind: ct.kind().unwrap_or_default(),
        })
    }

    /// Total mass of the population.
    pub fn total_mass(&self) -> f64 {
        self.position_mass.iter().map(|p| p.mass as f64).sum()
    }
}

impl FromIterator<Particle> for ParticleSet {
    fn from_iter<I: IntoIterator<Item = Particle>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut set = Self::with_capacity(iter.size_hint().0);
        for particle in iter {
            set.push(particle);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_record_sizes() {
        assert_eq!(std::mem::size_of::<PositionMass>(), 16);
        assert_eq!(std::mem::size_of::<VelocityRadius>(), 16);
        assert_eq!(std::mem::size_of::<ColorType>(), 32);
    }

    #[test]
    fn test_only_stars_emit() {
        let star = ColorType::new([1.0, 0.5, 0.25, 2.0], ParticleKind::Star);
        assert_eq!(star.emission(), [2.0, 1.0, 0.5, 2.0]);

        let dust = ColorType::new([1.0, 0.5, 0.25, 2.0], ParticleKind::Dust);
        assert_eq!(dust.emission(), [0.0; 4]);
    }

    #[test]
    fn test_set_round_trip() {
        let particles = vec![
            Particle::at_rest([1.0, 2.0, 3.0], 4.0),
            Particle::star([-1.0, 0.0, 1.0], 10.0, [1.0, 1.0, 0.8, 3.0])
                .with_velocity([0.5, 0.0, 0.0]),
        ];
        let set: ParticleSet = particles.iter().copied().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0), Some(particles[0]));
        assert_eq!(set.get(1), Some(particles[1]));
        assert_eq!(set.get(2), None);
        assert_eq!(set.total_mass(), 14.0);
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(ParticleKind::from_u32(7), None);
        assert!(ParticleKind::Star.is_emissive());
        assert!(!ParticleKind::Dust.is_emissive());
    }
}
