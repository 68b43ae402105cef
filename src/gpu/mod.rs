//! GPU resource substrate: device acquisition, pooled buffer allocator,
//! uniform cache, command recorder, and buffer-dtype tracking.

pub mod device;
pub mod dtype;
pub mod pool;
pub mod readback;
pub mod recorder;
pub mod registry;
pub mod uniform;

pub use device::{acquire_device, Device, DeviceCapabilities, DeviceLostFlag};
pub use dtype::{DType, Shape, Tensor};
pub use pool::{BufferPool, BufferState, PoolStats, PooledBuffer};
pub use readback::read_buffer_f32;
pub use recorder::{CommandRecorder, SubmitCompletion};
pub use registry::BufferDtypeRegistry;
pub use uniform::UniformCache;

/// Everything a kernel dispatch or pipeline-construction call needs: the
/// device, its buffer pool, its uniform cache, and the dtype registry,
/// bundled into one value threaded through every `forward` call instead of
/// four separate arguments. Lifetime tied to the device, per DESIGN.md's
/// re-architecture notes on moving module-level caches into an explicit
/// context object.
pub struct GpuContext {
    pub device: Device,
    pub pool: BufferPool,
    pub dtype_registry: BufferDtypeRegistry,
}

impl GpuContext {
    pub fn new(device: Device, pool_lru_cap: usize) -> Self {
        GpuContext {
            device,
            pool: BufferPool::new(pool_lru_cap),
            dtype_registry: BufferDtypeRegistry::new(),
        }
    }

    pub fn uniforms(&self) -> UniformCache<'_> {
        UniformCache::new(&self.pool)
    }

    pub fn recorder(&self, label: &str) -> crate::error::Result<CommandRecorder<'_>> {
        CommandRecorder::begin(&self.device, &self.pool, label)
    }
}
