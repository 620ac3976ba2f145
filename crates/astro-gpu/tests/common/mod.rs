#![allow(dead_code)]

use astro_core::{Particle, ParticleKind, ParticleSet, SimulationConfig};
use astro_gpu::{sync, GpuContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A GPU context, or `None` (with a log line) on machines without an adapter.
pub fn gpu_context() -> Option<GpuContext> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    match sync::new_context() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            tracing::warn!("skipping GPU test: {err}");
            None
        }
    }
}

/// Uniformly scattered particles inside `[-extent, extent]^3`, masses in `[0.5, 2)`.
pub fn random_particles(count: usize, extent: f32, seed: u64) -> ParticleSet {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let position = [
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
            ];
            let mass = rng.random_range(0.5..2.0);
            if rng.random_bool(0.1) {
                Particle::star(position, mass, [1.0, 0.8, 0.6, 1.0])
            } else {
                Particle {
                    kind: ParticleKind::Planet,
                    ..Particle::at_rest(position, mass)
                }
            }
        })
        .collect()
}

/// Direct-summation forces in f64 with the same softening, G and clamp.
pub fn direct_forces(particles: &ParticleSet, config: &SimulationConfig) -> Vec<[f64; 3]> {
    let eps2 = (config.softening as f64).powi(2);
    let g = config.gravitational_constant as f64;
    let pm = &particles.position_mass;

    pm.iter()
        .enumerate()
        .map(|(i, me)| {
            let mut force = [0.0f64; 3];
            for (j, other) in pm.iter().enumerate() {
                if i == j {
                    continue;
                }
                let d = [
                    other.position[0] as f64 - me.position[0] as f64,
                    other.position[1] as f64 - me.position[1] as f64,
                    other.position[2] as f64 - me.position[2] as f64,
                ];
                let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2] + eps2;
                let scale = g * me.mass as f64 * other.mass as f64 / (r2 * r2.sqrt());
                for axis in 0..3 {
                    force[axis] += d[axis] * scale;
                }
            }
            let magnitude = norm(force);
            let max_force = config.max_force as f64;
            if magnitude > max_force {
                force = force.map(|f| f * max_force / magnitude);
            }
            force
        })
        .collect()
}

/// Direct-summation received light: every other star's `rgb * a / (d^2 + eps^2)`.
pub fn direct_light(particles: &ParticleSet, config: &SimulationConfig) -> Vec<[f64; 3]> {
    let eps2 = (config.softening as f64).powi(2);
    let pm = &particles.position_mass;

    pm.iter()
        .enumerate()
        .map(|(i, me)| {
            let mut light = [0.0f64; 3];
            for (j, (other, color)) in pm.iter().zip(&particles.color_type).enumerate() {
                let emitted = color.emission();
                if i == j || emitted[3] <= 0.0 {
                    continue;
                }
                let d2: f64 = (0..3)
                    .map(|axis| (other.position[axis] as f64 - me.position[axis] as f64).powi(2))
                    .sum();
                for channel in 0..3 {
                    light[channel] += emitted[channel] as f64 / (d2 + eps2);
                }
            }
            light
        })
        .collect()
}

pub fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn to_f64(v: [f32; 3]) -> [f64; 3] {
    v.map(f64::from)
}

/// `|a - b| / max(|b|, floor)`.
pub fn relative_error(a: [f64; 3], b: [f64; 3], floor: f64) -> f64 {
    norm([a[0] - b[0], a[1] - b[1], a[2] - b[2]]) / norm(b).max(floor)
}
