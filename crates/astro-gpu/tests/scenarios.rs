mod common;

use astro_core::{ConfigError, Particle, ParticleSet, SimulationConfig};
use astro_gpu::{GpuError, GravitySimulation};

fn pair(a: [f32; 3], ma: f32, b: [f32; 3], mb: f32) -> ParticleSet {
    [Particle::at_rest(a, ma), Particle::at_rest(b, mb)]
        .into_iter()
        .collect()
}

#[test]
fn test_single_particle_feels_nothing() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let particles: ParticleSet = [Particle::at_rest([1.0, 2.0, 3.0], 5.0)]
        .into_iter()
        .collect();
    let mut simulation =
        GravitySimulation::with_context(ctx, SimulationConfig::default(), &particles).unwrap();

    simulation.step();
    assert_eq!(simulation.frame(), 1);

    let sample = simulation.read_forces().unwrap()[0];
    assert_eq!(sample.force, [0.0; 3]);
    assert_eq!(sample.light, [0.0; 3]);
    assert_eq!(simulation.read_particles().unwrap(), particles);
}

#[test]
fn test_symmetric_pair_is_equal_and_opposite() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let particles = pair([-1.0, 0.0, 0.0], 2.0, [1.0, 0.0, 0.0], 2.0);
    let mut ctx = Some(ctx);

    // Once through the singleton shortcut, once through a sorted tree.
    for unsorted_threshold in [256, 0] {
        let config = SimulationConfig {
            unsorted_threshold,
            ..Default::default()
        };
        let eps2 = (config.softening as f64).powi(2);
        let expected = config.gravitational_constant as f64 * 4.0 * 2.0 / (4.0 + eps2).powf(1.5);

        let Some(context) = ctx.take() else {
            return;
        };
        let mut simulation = GravitySimulation::with_context(context, config, &particles).unwrap();
        simulation.compute_forces();
        let forces = simulation.read_forces().unwrap();

        let (a, b) = (forces[0].force, forces[1].force);
        assert!((a[0] as f64 - expected).abs() < 1e-4 * expected, "{a:?}");
        for axis in 0..3 {
            assert!((a[axis] + b[axis]).abs() < 1e-5 * expected as f32);
        }
        assert_eq!(a[1], 0.0);
        assert_eq!(a[2], 0.0);
        ctx = Some(simulation.into_context());
    }
}

#[test]
fn test_two_body_matches_newton() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let config = SimulationConfig {
        gravitational_constant: 0.5,
        softening: 0.01,
        ..Default::default()
    };
    let particles = pair([0.0, 0.0, 0.0], 3.0, [0.0, 4.0, 0.0], 5.0);
    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();

    let force = simulation.read_forces().unwrap()[0].force;
    let newton = 0.5 * 3.0 * 5.0 / 16.0;
    assert!(((force[1] as f64) - newton).abs() < 1e-3 * newton);
}

#[test]
fn test_pair_falls_together() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let particles = pair([-2.0, 0.0, 0.0], 1.0, [2.0, 0.0, 0.0], 1.0);
    let mut simulation =
        GravitySimulation::with_context(ctx, SimulationConfig::default(), &particles).unwrap();
    for _ in 0..10 {
        simulation.step();
    }

    let state = simulation.read_particles().unwrap();
    let [left, right] = [state.get(0).unwrap(), state.get(1).unwrap()];
    assert!(left.velocity[0] > 0.0);
    assert!(right.velocity[0] < 0.0);
    assert!(left.position[0] > -2.0 && right.position[0] < 2.0);
    assert_eq!(simulation.frame(), 10);
}

#[test]
fn test_zero_theta_matches_direct_sum() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let config = SimulationConfig {
        max_particles: 1_000,
        key_layers: 10,
        theta: 0.0,
        stack_capacity: 128,
        unsorted_threshold: 0,
        ..Default::default()
    };
    let particles = common::random_particles(1_000, 50.0, 31);
    let reference = common::direct_forces(&particles, &config);

    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();
    let samples = simulation.read_forces().unwrap();

    let rms = (reference.iter().map(|f| common::norm(*f).powi(2)).sum::<f64>()
        / reference.len() as f64)
        .sqrt();
    for (sample, expected) in samples.iter().zip(&reference) {
        assert_eq!(sample.truncated, 0);
        let error = common::relative_error(common::to_f64(sample.force), *expected, rms);
        assert!(error < 1e-3, "error {error}");
    }
}

#[test]
fn test_zero_theta_light_matches_direct_sum() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let config = SimulationConfig {
        max_particles: 800,
        key_layers: 10,
        theta: 0.0,
        stack_capacity: 128,
        unsorted_threshold: 0,
        ..Default::default()
    };
    let particles = common::random_particles(800, 50.0, 35);
    let reference = common::direct_light(&particles, &config);

    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();
    simulation.validate_tree().unwrap();

    // Only stars feed the tree, and the roots carry all of their intensity.
    let intensity: f64 = particles
        .color_type
        .iter()
        .map(|c| c.emission()[3] as f64)
        .sum();
    assert!(intensity > 0.0);
    let tree = simulation.read_tree().unwrap();
    let root_intensity: f64 = tree.roots().iter().map(|n| n.emitted[3] as f64).sum();
    assert!((root_intensity - intensity).abs() < 1e-5 * intensity);

    let samples = simulation.read_forces().unwrap();
    let rms = (reference.iter().map(|l| common::norm(*l).powi(2)).sum::<f64>()
        / reference.len() as f64)
        .sqrt();
    for (sample, expected) in samples.iter().zip(&reference) {
        assert!(sample.light.iter().all(|&c| c >= 0.0));
        let error = common::relative_error(common::to_f64(sample.light), *expected, rms);
        assert!(error < 1e-3, "error {error}");
    }
}

#[test]
fn test_opening_angle_prunes_the_walk() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let n = 20_000;
    let config = SimulationConfig {
        max_particles: n,
        theta: 1.0,
        ..Default::default()
    };
    let particles = common::random_particles(n as usize, 90.0, 32);
    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();
    let samples = simulation.read_forces().unwrap();

    let mean_visited =
        samples.iter().map(|s| s.visited as f64).sum::<f64>() / samples.len() as f64;
    assert!(mean_visited < n as f64 / 10.0, "visited {mean_visited}");
    assert!(samples.iter().all(|s| s.is_finite()));
}

#[test]
fn test_shared_leaf_excludes_only_self() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    // Leaves are 12.5 wide: the first two particles share one, the third is alone.
    let config = SimulationConfig {
        key_layers: 4,
        theta: 0.0,
        unsorted_threshold: 0,
        ..Default::default()
    };
    let particles: ParticleSet = [
        Particle::at_rest([1.0, 1.0, 1.0], 2.0),
        Particle::at_rest([1.5, 1.0, 1.0], 3.0),
        Particle::at_rest([-60.0, 30.0, 10.0], 4.0),
    ]
    .into_iter()
    .collect();
    let reference = common::direct_forces(&particles, &config);

    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();
    let tree = simulation.read_tree().unwrap();
    assert_eq!(tree.leaf_of[0], tree.leaf_of[1]);
    assert_ne!(tree.leaf_of[0], tree.leaf_of[2]);

    let samples = simulation.read_forces().unwrap();
    for (sample, expected) in samples.iter().zip(&reference) {
        let error = common::relative_error(common::to_f64(sample.force), *expected, 1e-9);
        assert!(error < 1e-3, "error {error}");
    }
}

#[test]
fn test_stack_truncation_is_counted() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let config = SimulationConfig {
        max_particles: 500,
        theta: 0.0,
        stack_capacity: 1,
        unsorted_threshold: 0,
        ..Default::default()
    };
    let particles = common::random_particles(500, 50.0, 33);
    let mut simulation = GravitySimulation::with_context(ctx, config, &particles).unwrap();
    simulation.compute_forces();

    for sample in simulation.read_forces().unwrap() {
        assert!(sample.is_finite());
        assert!(sample.truncated > 0);
        assert_eq!(sample.visited, 1);
    }
}

#[test]
fn test_force_params_update_between_frames() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let particles = pair([0.0, 0.0, 0.0], 1.0, [3.0, 0.0, 0.0], 1.0);
    let mut simulation =
        GravitySimulation::with_context(ctx, SimulationConfig::default(), &particles).unwrap();
    simulation.compute_forces();
    let before = simulation.read_forces().unwrap()[0].force[0];

    simulation.set_force_params(0.5, 0.05, 1.0e4, 2.0).unwrap();
    simulation.compute_forces();
    let after = simulation.read_forces().unwrap()[0].force[0];
    assert!((after - 2.0 * before).abs() < 1e-5 * after.abs());

    simulation.set_force_params(0.5, 0.05, 0.01, 2.0).unwrap();
    simulation.compute_forces();
    let clamped = simulation.read_forces().unwrap()[0];
    assert!((clamped.magnitude() - 0.01).abs() < 1e-6);

    assert!(matches!(
        simulation.set_force_params(-1.0, 0.05, 1.0e4, 1.0),
        Err(GpuError::Config(ConfigError::InvalidParameter { name: "theta", .. }))
    ));
}

#[test]
fn test_invalid_configuration_is_fatal() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let particles = common::random_particles(10, 5.0, 34);
    let config = SimulationConfig {
        max_particles: 5,
        ..Default::default()
    };
    assert!(matches!(
        GravitySimulation::with_context(ctx, config, &particles),
        Err(GpuError::Config(ConfigError::TooManyParticles { count: 10, max: 5 }))
    ));
}
