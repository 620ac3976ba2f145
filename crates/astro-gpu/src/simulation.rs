//! Frame driver tying every stage together.

use astro_core::{ForceSample, ParticleSet, SimulationConfig, TreeSnapshot, TreeStats};

use crate::force::ForceEvaluator;
use crate::gpu::{GpuContext, ParticleBuffers};
use crate::integrate::Integrator;
use crate::keys::KeyGenerator;
use crate::tree::TreeBuilder;
use crate::Result;

/// Relative tolerance used by [`GravitySimulation::validate_tree`].
pub const TREE_TOLERANCE: f64 = 1.0e-5;

/// GPU Barnes-Hut gravity simulation.
///
/// Particle state stays on the GPU. [`step`](Self::step) records key
/// generation, the tree build, force evaluation and integration into a single
/// command buffer; nothing is read back unless asked for.
pub struct GravitySimulation {
    ctx: GpuContext,
    config: SimulationConfig,
    buffers: ParticleBuffers,
    keys: KeyGenerator,
    tree: TreeBuilder,
    forces: ForceEvaluator,
    integrator: Integrator,
    particle_count: u32,
    frame: u64,
}

impl GravitySimulation {
    /// Create a simulation on the highest-performance adapter.
    pub async fn new(config: SimulationConfig, particles: &ParticleSet) -> Result<Self> {
        let ctx = GpuContext::new().await?;
        Self::with_context(ctx, config, particles)
    }

    /// Create a simulation on an existing context.
    pub fn with_context(
        ctx: GpuContext,
        config: SimulationConfig,
        particles: &ParticleSet,
    ) -> Result<Self> {
        config.validate()?;
        config.check_particle_count(particles.len())?;

        let buffers = ParticleBuffers::new(&ctx, config.max_particles)?;
        let tree = TreeBuilder::new(&ctx, &config, &buffers.position_mass, &buffers.color_type)?;
        let keys = KeyGenerator::new(&ctx, &config, &buffers.position_mass, tree.entries());
        let forces = ForceEvaluator::new(&ctx, &config, &buffers, &tree);
        let integrator = Integrator::new(&ctx, &config, &buffers);

        let mut simulation = Self {
            ctx,
            config,
            buffers,
            keys,
            tree,
            forces,
            integrator,
            particle_count: 0,
            frame: 0,
        };
        simulation.write_particles(particles)?;

        tracing::info!(
            particles = simulation.particle_count,
            max_particles = simulation.config.max_particles,
            key_layers = simulation.config.key_layers,
            "gravity simulation ready"
        );

        Ok(simulation)
    }

    /// Advance one frame: build the tree, evaluate forces and integrate.
    pub fn step(&mut self) {
        self.submit_frame(true);
        self.frame += 1;
    }

    /// Build the tree and evaluate forces without moving anything.
    pub fn compute_forces(&mut self) {
        self.submit_frame(false);
    }

    fn submit_frame(&self, integrate: bool) {
        tracing::debug!(
            frame = self.frame,
            particles = self.particle_count,
            shortcut = self.tree.uses_shortcut(),
            integrate,
            "encoding frame"
        );

        let mut encoder = self.ctx.encoder("Gravity Frame Encoder");
        self.keys.encode(&mut encoder);
        self.tree.encode(&mut encoder);
        self.forces.encode(&mut encoder);
        if integrate {
            self.integrator.encode(&mut encoder);
        }
        self.ctx.submit(encoder);
    }

    /// Replace the particle population. The count may change, up to `max_particles`.
    pub fn write_particles(&mut self, particles: &ParticleSet) -> Result<()> {
        self.config.check_particle_count(particles.len())?;
        self.buffers.upload(&self.ctx, particles)?;

        let count = particles.len() as u32;
        if count != self.particle_count {
            self.keys.set_particle_count(&self.ctx, count);
            self.tree.set_particle_count(&self.ctx, count)?;
            self.forces.set_particle_count(&self.ctx, count);
            self.integrator.set_particle_count(&self.ctx, count);
            self.particle_count = count;
        }
        Ok(())
    }

    /// Change θ, softening, the force clamp and G between frames.
    pub fn set_force_params(
        &mut self,
        theta: f32,
        softening: f32,
        max_force: f32,
        gravitational_constant: f32,
    ) -> Result<()> {
        let config = SimulationConfig {
            theta,
            softening,
            max_force,
            gravitational_constant,
            ..self.config.clone()
        };
        config.validate()?;

        self.forces.set_params(&self.ctx, &config);
        self.config = config;
        Ok(())
    }

    /// Change the time step and damping between frames.
    pub fn set_step_params(&mut self, dt: f32, damping: f32) -> Result<()> {
        let config = SimulationConfig {
            dt,
            damping,
            ..self.config.clone()
        };
        config.validate()?;

        self.integrator.set_step(&self.ctx, dt, damping);
        self.config = config;
        Ok(())
    }

    pub fn read_particles(&self) -> Result<ParticleSet> {
        self.buffers.download(&self.ctx, self.particle_count)
    }

    /// Forces from the last frame. Traversals that ran out of stack are logged.
    pub fn read_forces(&self) -> Result<Vec<ForceSample>> {
        let samples = self.forces.read_forces(&self.ctx, &self.buffers)?;

        let truncated = samples.iter().filter(|s| s.truncated > 0).count();
        if truncated > 0 {
            tracing::warn!(
                particles = truncated,
                stack_capacity = self.config.stack_capacity,
                "traversal stack overflowed; nodes taken as single masses"
            );
        }
        Ok(samples)
    }

    pub fn read_tree(&self) -> Result<TreeSnapshot> {
        self.tree.read_snapshot(&self.ctx)
    }

    /// Read the tree and particles back and check every structural invariant.
    pub fn validate_tree(&self) -> Result<TreeStats> {
        let snapshot = self.read_tree()?;
        let stats = snapshot.validate(TREE_TOLERANCE)?;
        let particles = self.read_particles()?;
        snapshot.validate_leaves(
            &particles.position_mass,
            &self.config.quantizer(),
            self.config.key_layers,
        )?;
        Ok(stats)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn tree(&self) -> &TreeBuilder {
        &self.tree
    }

    /// Give the context back, e.g. to build another simulation on it.
    pub fn into_context(self) -> GpuContext {
        self.ctx
    }
}

impl std::fmt::Debug for GravitySimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GravitySimulation")
            .field("adapter", &self.ctx.adapter_info.name)
            .field("particle_count", &self.particle_count)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// Synchronous wrappers for callers without an async runtime.
pub mod sync {
    use super::*;

    pub fn new_context() -> Result<GpuContext> {
        pollster::block_on(GpuContext::new())
    }

    /// Create a simulation synchronously.
    pub fn new_simulation(
        config: SimulationConfig,
        particles: &ParticleSet,
    ) -> Result<GravitySimulation> {
        pollster::block_on(GravitySimulation::new(config, particles))
    }
}
