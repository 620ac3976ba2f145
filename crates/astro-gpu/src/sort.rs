//! Stable binary LSD radix sort of [`SortEntry`] pairs.
//!
//! Each pass partitions on one key bit: flag the 0-bits, scan the flags,
//! scatter into the other half of a ping-pong pair. A bit range of `b`
//! passes leaves the result in the back buffer when `b` is odd, in which
//! case it is copied to the front so callers always find it there.

use std::ops::Range;

use astro_core::SortEntry;

use crate::gpu::{self, storage_entry, uniform_entry, ComputeKernel, GpuContext};
use crate::scan::PrefixScan;
use crate::shaders::{compose, SORT_SHADER};
use crate::{GpuError, Result};

/// Bits in a full key.
pub const KEY_BITS: u32 = 64;

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct SortParams {
    bit: u32,
    _pad: [u32; 3],
}

/// Radix sorter over up to `capacity` entries with a GPU-resident live count.
pub struct RadixSorter {
    capacity: u32,
    scan: PrefixScan,
    front: wgpu::Buffer,
    back: wgpu::Buffer,
    flag_kernel: ComputeKernel,
    scatter_kernel: ComputeKernel,
    /// `[bit][parity]`: parity 0 reads front and writes back.
    bind_groups: Vec<[wgpu::BindGroup; 2]>,
    _bit_params: Vec<wgpu::Buffer>,
}

impl RadixSorter {
    /// Create a sorter whose live length is the first `u32` of `count`.
    pub fn new(ctx: &GpuContext, capacity: u32, count: &wgpu::Buffer) -> Result<Self> {
        let entry_bytes = capacity as u64 * std::mem::size_of::<SortEntry>() as u64;
        ctx.check_storage("sort entries", entry_bytes)?;

        let scan = PrefixScan::new(ctx, capacity, count)?;
        let front = gpu::storage_buffer(ctx, "Sort Front Buffer", entry_bytes);
        let back = gpu::storage_buffer(ctx, "Sort Back Buffer", entry_bytes);

        let module = gpu::shader_module(ctx, "Sort Shader", &compose(SORT_SHADER));
        let entries = [
            storage_entry(0, true),
            storage_entry(1, false),
            storage_entry(2, false),
            storage_entry(3, true),
            storage_entry(4, true),
            uniform_entry(5),
        ];
        let flag_kernel =
            ComputeKernel::new(ctx, "Flag Zero Bits", &module, "flag_zero_bits", &entries);
        let scatter_kernel = ComputeKernel::with_layout(
            ctx,
            "Scatter",
            &module,
            "scatter",
            flag_kernel.layout.clone(),
        );

        let mut bit_params = Vec::with_capacity(KEY_BITS as usize);
        let mut bind_groups = Vec::with_capacity(KEY_BITS as usize);
        for bit in 0..KEY_BITS {
            let params = gpu::uniform_buffer(
                ctx,
                "Sort Params",
                &SortParams {
                    bit,
                    _pad: [0; 3],
                },
            );
            let bind = |src: &wgpu::Buffer, dst: &wgpu::Buffer| {
                flag_kernel.bind(
                    ctx,
                    &[
                        (0, src),
                        (1, dst),
                        (2, scan.data()),
                        (3, scan.total()),
                        (4, count),
                        (5, &params),
                    ],
                )
            };
            bind_groups.push([bind(&front, &back), bind(&back, &front)]);
            bit_params.push(params);
        }

        tracing::debug!(capacity, "created radix sorter");

        Ok(Self {
            capacity,
            scan,
            front,
            back,
            flag_kernel,
            scatter_kernel,
            bind_groups,
            _bit_params: bit_params,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Entries to sort; holds the sorted result after [`encode`](Self::encode).
    pub fn front(&self) -> &wgpu::Buffer {
        &self.front
    }

    /// Scratch half of the ping-pong pair.
    pub fn back(&self) -> &wgpu::Buffer {
        &self.back
    }

    /// The scan the sorter partitions with, reusable between sorts.
    pub fn scan(&self) -> &PrefixScan {
        &self.scan
    }

    /// Record passes for every bit in `bits`, least significant first.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, bits: Range<u32>) {
        let bits = bits.start.min(KEY_BITS)..bits.end.min(KEY_BITS);
        let groups = gpu::workgroups(self.capacity);

        for (pass, bit) in bits.clone().enumerate() {
            let bind_group = &self.bind_groups[bit as usize][pass % 2];
            self.flag_kernel.dispatch(encoder, bind_group, groups);
            self.scan.encode(encoder);
            self.scatter_kernel.dispatch(encoder, bind_group, groups);
        }

        if bits.len() % 2 == 1 {
            let bytes = self.capacity as u64 * std::mem::size_of::<SortEntry>() as u64;
            encoder.copy_buffer_to_buffer(&self.back, 0, &self.front, 0, bytes);
        }
    }

    /// Write entries into the front buffer.
    pub fn upload(&self, ctx: &GpuContext, entries: &[SortEntry]) -> Result<()> {
        if entries.len() > self.capacity as usize {
            return Err(GpuError::InvalidInput(format!(
                "{} entries exceed sort capacity {}",
                entries.len(),
                self.capacity
            )));
        }
        ctx.queue
            .write_buffer(&self.front, 0, bytemuck::cast_slice(entries));
        Ok(())
    }

    pub fn read_sorted(&self, ctx: &GpuContext, len: usize) -> Result<Vec<SortEntry>> {
        gpu::read_buffer(ctx, &self.front, len.min(self.capacity as usize))
    }
}
