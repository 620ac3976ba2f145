//! Multi-level exclusive prefix sum.
//!
//! Level 0 is the caller's data. Each level scans 512-element blocks and
//! writes the block totals into the next level, until a level fits in a
//! single block; that block's total is the grand total. Offsets are then
//! added back from the top level down.
//!
//! ```text
//! level 0   [......................................]   capacity
//! level 1   [.....]                                     ceil(capacity / 512)
//! total     [.]
//! ```
//!
//! The live length is read on the GPU from a count buffer, so a scan sized
//! for N elements can run over any prefix of them.

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext};
use crate::shaders::{compose, SCAN_SHADER};
use crate::{GpuError, Result};

/// Elements scanned by one work-group.
pub const SCAN_BLOCK: u32 = 512;

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct ScanParams {
    level: u32,
    _pad: [u32; 3],
}

struct ScanLevel {
    data: wgpu::Buffer,
    capacity: u32,
    bind_group: wgpu::BindGroup,
    _params: wgpu::Buffer,
}

/// Exclusive scan over up to `capacity` `u32`s.
pub struct PrefixScan {
    capacity: u32,
    levels: Vec<ScanLevel>,
    total: wgpu::Buffer,
    scan_kernel: ComputeKernel,
    add_kernel: ComputeKernel,
}

/// Capacities of every level for a scan of `capacity` elements.
pub fn level_capacities(capacity: u32) -> Vec<u32> {
    let mut levels = vec![capacity.max(1)];
    while let Some(&last) = levels.last() {
        if last <= SCAN_BLOCK {
            break;
        }
        levels.push(last.div_ceil(SCAN_BLOCK));
    }
    levels
}

impl PrefixScan {
    /// Create a scan for up to `capacity` elements whose live length is the
    /// first `u32` of `count`.
    pub fn new(ctx: &GpuContext, capacity: u32, count: &wgpu::Buffer) -> Result<Self> {
        ctx.check_storage("scan buffer", capacity as u64 * 4)?;

        let module = gpu::shader_module(ctx, "Scan Shader", &compose(SCAN_SHADER));
        let entries = [
            storage_entry(0, false),
            storage_entry(1, false),
            storage_entry(2, true),
            uniform_entry(3),
        ];
        let scan_kernel = ComputeKernel::new(ctx, "Scan Blocks", &module, "scan_blocks", &entries);
        let add_kernel = ComputeKernel::with_layout(
            ctx,
            "Add Block Offsets",
            &module,
            "add_block_offsets",
            scan_kernel.layout.clone(),
        );

        let capacities = level_capacities(capacity);
        let total = gpu::storage_buffer(ctx, "Scan Total", 4);
        let buffers: Vec<wgpu::Buffer> = capacities
            .iter()
            .enumerate()
            .map(|(level, &cap)| {
                gpu::storage_buffer(ctx, &format!("Scan Level {level}"), cap as u64 * 4)
            })
            .collect();

        let mut bindings = Vec::with_capacity(buffers.len());
        for (level, data) in buffers.iter().enumerate() {
            let params = gpu::uniform_buffer(
                ctx,
                "Scan Params",
                &ScanParams {
                    level: level as u32,
                    _pad: [0; 3],
                },
            );
            let sums = buffers.get(level + 1).unwrap_or(&total);
            let bind_group =
                scan_kernel.bind(ctx, &[(0, data), (1, sums), (2, count), (3, &params)]);
            bindings.push((bind_group, params));
        }

        let levels: Vec<ScanLevel> = buffers
            .into_iter()
            .zip(bindings)
            .zip(&capacities)
            .map(|((data, (bind_group, params)), &capacity)| ScanLevel {
                data,
                capacity,
                bind_group,
                _params: params,
            })
            .collect();

        tracing::debug!(
            capacity,
            levels = capacities.len(),
            "created prefix scan"
        );

        Ok(Self {
            capacity,
            levels,
            total,
            scan_kernel,
            add_kernel,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Input and output of the scan: scanned in place.
    pub fn data(&self) -> &wgpu::Buffer {
        &self.levels[0].data
    }

    /// One-element buffer receiving the sum of all inputs.
    pub fn total(&self) -> &wgpu::Buffer {
        &self.total
    }

    /// Record the scan. The count buffer must already hold the live length.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        for level in &self.levels {
            self.scan_kernel.dispatch(
                encoder,
                &level.bind_group,
                level.capacity.div_ceil(SCAN_BLOCK),
            );
        }
        // The top level is a single block and needs no fix-up.
        for level in self.levels.iter().rev().skip(1) {
            self.add_kernel
                .dispatch(encoder, &level.bind_group, gpu::workgroups(level.capacity));
        }
    }

    /// Write inputs into the data buffer.
    pub fn upload(&self, ctx: &GpuContext, values: &[u32]) -> Result<()> {
        if values.len() > self.capacity as usize {
            return Err(GpuError::InvalidInput(format!(
                "{} values exceed scan capacity {}",
                values.len(),
                self.capacity
            )));
        }
        ctx.queue
            .write_buffer(self.data(), 0, bytemuck::cast_slice(values));
        Ok(())
    }

    pub fn read_prefix(&self, ctx: &GpuContext, len: usize) -> Result<Vec<u32>> {
        gpu::read_buffer(ctx, self.data(), len.min(self.capacity as usize))
    }

    pub fn read_total(&self, ctx: &GpuContext) -> Result<u32> {
        Ok(gpu::read_buffer::<u32>(ctx, &self.total, 1)?[0])
    }
}
