//! Rotating disk galaxy driven by GPU Barnes-Hut gravity.
//!
//! Run with: cargo run --example galaxy

use std::time::Instant;

use astro_core::{Particle, ParticleKind, ParticleSet, SimulationConfig};
use astro_gpu::sync;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let particle_count = 50_000;
    let core_mass = 10_000.0;
    let config = SimulationConfig {
        max_particles: particle_count,
        key_layers: 10,
        theta: 0.7,
        softening: 0.1,
        dt: 0.005,
        damping: 0.0,
        world_half_extent: 64.0,
        ..Default::default()
    };

    println!("Creating disk galaxy with {particle_count} particles...");

    let mut rng = StdRng::seed_from_u64(7);
    let mut particles = ParticleSet::with_capacity(particle_count as usize);
    particles.push(Particle::star([0.0; 3], core_mass, [1.0, 0.9, 0.7, 50.0]));
    for _ in 1..particle_count {
        let radius: f32 = rng.random_range(2.0..40.0);
        let angle: f32 = rng.random_range(0.0..std::f32::consts::TAU);
        let height: f32 = rng.random_range(-0.5..0.5);
        let speed = (config.gravitational_constant * core_mass / radius).sqrt();

        let position = [radius * angle.cos(), height, radius * angle.sin()];
        let velocity = [-speed * angle.sin(), 0.0, speed * angle.cos()];
        let particle = if rng.random_bool(0.02) {
            Particle::star(position, 1.0, [0.6, 0.7, 1.0, 1.0])
        } else {
            Particle {
                kind: if rng.random_bool(0.5) {
                    ParticleKind::Dust
                } else {
                    ParticleKind::Planet
                },
                ..Particle::at_rest(position, 0.1)
            }
        };
        particles.push(particle.with_velocity(velocity));
    }

    println!("Initializing GPU simulation...");
    let mut simulation = sync::new_simulation(config, &particles)?;

    let stats = {
        simulation.compute_forces();
        simulation.validate_tree()?
    };
    println!(
        "Tree: {} nodes, {} leaves, top layer {}",
        stats.node_count, stats.leaf_count, stats.top_layer
    );

    let frames = 200;
    let start = Instant::now();
    for frame in 0..frames {
        simulation.step();

        if frame % 50 == 0 {
            let forces = simulation.read_forces()?;
            let visited =
                forces.iter().map(|f| f.visited as f64).sum::<f64>() / forces.len() as f64;
            println!("Frame {frame}: {visited:.0} nodes visited per particle");
        }
    }
    // Readback waits for the queue, so the timing covers every frame.
    let state = simulation.read_particles()?;
    let elapsed = start.elapsed();
    let fps = frames as f64 / elapsed.as_secs_f64();

    println!("\nCompleted {frames} frames in {elapsed:.2?} ({fps:.1} frames/sec)");

    let outermost = state
        .position_mass
        .iter()
        .map(|pm| pm.position[0].hypot(pm.position[2]))
        .fold(0.0f32, f32::max);
    println!("Disk radius after {frames} frames: {outermost:.1}");

    println!("\nFirst 5 particles:");
    for (i, particle) in (0..5).filter_map(|i| state.get(i)).enumerate() {
        println!(
            "  {i}: ({:.2}, {:.2}, {:.2})",
            particle.position[0], particle.position[1], particle.position[2]
        );
    }

    Ok(())
}
