//! Small (≤ 256 B) uniform buffer cache.
//!
//! Each dispatch's params blob is a fire-and-forget tiny buffer, backed by
//! the same [`BufferPool`] bucketing rather than a bespoke allocator, since a
//! 256-byte bucket is already the pool's smallest bucket.

use std::sync::Arc;

use crate::error::Result;
use crate::gpu::device::Device;
use crate::gpu::pool::{BufferPool, PooledBuffer};
use crate::gpu::recorder::CommandRecorder;

pub const MAX_UNIFORM_SIZE: u64 = 256;

pub struct UniformCache<'a> {
    pool: &'a BufferPool,
}

impl<'a> UniformCache<'a> {
    pub fn new(pool: &'a BufferPool) -> Self {
        UniformCache { pool }
    }

    /// Allocates a uniform buffer, writes into a staging view via `write_fn`,
    /// uploads it, and returns it. When `recorder` is `Some`, the buffer is
    /// released back to the pool once that recorder's submission completes;
    /// otherwise the caller must call `pool.release` explicitly.
    pub fn write_uniforms(
        &self,
        device: &Device,
        recorder: Option<&mut CommandRecorder>,
        label: &str,
        write_fn: impl FnOnce(&mut [u8]),
    ) -> Result<Arc<PooledBuffer>> {
        device.check_alive()?;
        let buffer = self.pool.acquire(
            device,
            MAX_UNIFORM_SIZE,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            label,
        )?;

        let mut staging = vec![0u8; MAX_UNIFORM_SIZE as usize];
        write_fn(&mut staging);
        device.queue().write_buffer(&buffer.raw, 0, &staging);

        match recorder {
            Some(rec) => rec.track_temporary(buffer.clone()),
            None => {}
        }
        Ok(buffer)
    }
}
