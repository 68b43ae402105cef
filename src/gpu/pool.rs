//! Pooled allocator for transient GPU buffers.
//!
//! Buffers are grouped into next-power-of-two size buckets, using a
//! generational-index idea applied to freelists instead of an arena: each
//! bucket is a `Vec<Arc<PooledBuffer>>` of buffers currently idle, and every
//! reuse bumps a generation counter so a stale `Tensor` built atop a buffer
//! that has since been re-issued can be told apart in debug builds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::gpu::device::Device;

/// State of a pool entry, tracked for diagnostics; the bucket partition
/// (free list vs. checked-out) is the actual source of truth, this is
/// bookkeeping exposed to callers that want to assert on it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    Free,
    InUse,
    TrackedByRecorder,
}

/// A pooled GPU buffer. Tensors hold an `Arc` to this; the pool is the only
/// owner of the underlying `wgpu::Buffer`. `generation` and `label` use
/// interior mutability so a physical buffer can be handed out again under a
/// new label/generation without reallocating the GPU resource.
pub struct PooledBuffer {
    pub raw: wgpu::Buffer,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    pub bucket_size: u64,
    generation: AtomicU64,
    label: Mutex<Arc<str>>,
    pub(crate) state: Mutex<BufferState>,
}

impl PooledBuffer {
    pub fn state(&self) -> BufferState {
        *self.state.lock().unwrap()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn label(&self) -> Arc<str> {
        self.label.lock().unwrap().clone()
    }

    fn reissue(&self, generation: u64, label: &str) {
        self.generation.store(generation, Ordering::Release);
        *self.label.lock().unwrap() = label.into();
        *self.state.lock().unwrap() = BufferState::InUse;
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct PoolStats {
    pub allocations_total: u64,
    pub reuses_total: u64,
    pub releases_total: u64,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.allocations_total + self.reuses_total;
        if total == 0 {
            0.0
        } else {
            self.reuses_total as f64 / total as f64
        }
    }
}

struct Bucket {
    free: Vec<Arc<PooledBuffer>>,
    lru_cap: usize,
}

impl Bucket {
    fn new(lru_cap: usize) -> Self {
        Bucket {
            free: Vec::new(),
            lru_cap,
        }
    }
}

/// Process-wide (per-device) pooled allocator. `acquire`/`release` are the
/// only entry points; a recorder tracks buffers it acquired and releases them
/// automatically on submission completion.
pub struct BufferPool {
    buckets: Mutex<HashMap<u64, Bucket>>,
    stats: Mutex<PoolStats>,
    next_generation: AtomicU64,
    granularity_log2_floor: u32,
    default_lru_cap: usize,
}

impl BufferPool {
    pub fn new(default_lru_cap: usize) -> Self {
        BufferPool {
            buckets: Mutex::new(HashMap::new()),
            stats: Mutex::new(PoolStats::default()),
            next_generation: AtomicU64::new(1),
            granularity_log2_floor: 8, // buckets below 256B still round to 256B
            default_lru_cap,
        }
    }

    fn bucket_size_for(&self, size: u64) -> u64 {
        let floor = 1u64 << self.granularity_log2_floor;
        size.max(floor).next_power_of_two()
    }

    /// Returns a buffer whose byte length is at least `size` (rounded to the
    /// bucket granularity) and whose usage flags are a superset of `usage`.
    pub fn acquire(
        &self,
        device: &Device,
        size: u64,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Result<Arc<PooledBuffer>> {
        device.check_alive()?;
        let bucket_size = self.bucket_size_for(size);

        let reused = {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets
                .entry(bucket_size)
                .or_insert_with(|| Bucket::new(self.default_lru_cap));
            bucket
                .free
                .iter()
                .position(|b| b.usage.contains(usage))
                .map(|idx| bucket.free.remove(idx))
        };

        if let Some(buf) = reused {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            buf.reissue(generation, label);
            self.stats.lock().unwrap().reuses_total += 1;
            log::trace!("pool: reused {bucket_size}B buffer for `{label}` (gen {generation})");
            return Ok(buf);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let raw = device.raw().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bucket_size,
            usage,
            mapped_at_creation: false,
        });
        self.stats.lock().unwrap().allocations_total += 1;
        log::trace!("pool: allocated new {bucket_size}B buffer for `{label}` (gen {generation})");

        Ok(Arc::new(PooledBuffer {
            raw,
            size: bucket_size,
            usage,
            bucket_size,
            generation: AtomicU64::new(generation),
            label: Mutex::new(label.into()),
            state: Mutex::new(BufferState::InUse),
        }))
    }

    /// Returns a checked-out buffer to its bucket's freelist. Evicts the
    /// least-recently-returned entry first if the bucket is at its LRU cap.
    pub fn release(&self, buffer: Arc<PooledBuffer>) {
        *buffer.state.lock().unwrap() = BufferState::Free;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(buffer.bucket_size)
            .or_insert_with(|| Bucket::new(self.default_lru_cap));
        if bucket.free.len() >= bucket.lru_cap && bucket.lru_cap > 0 {
            bucket.free.remove(0); // drop oldest; wgpu::Buffer frees on Drop
        }
        if bucket.lru_cap > 0 {
            bucket.free.push(buffer);
        }
        self.stats.lock().unwrap().releases_total += 1;
    }

    /// Marks a buffer as owned by an in-flight recorder; it is not returned to
    /// its bucket until the recorder's submission completes.
    pub fn mark_tracked(&self, buffer: &Arc<PooledBuffer>) {
        *buffer.state.lock().unwrap() = BufferState::TrackedByRecorder;
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().unwrap()
    }

    /// Configures the LRU cap for buffers of a given (already-bucketed) size.
    pub fn set_lru_cap(&self, bucket_size: u64, cap: usize) {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(bucket_size)
            .or_insert_with(|| Bucket::new(self.default_lru_cap));
        bucket.lru_cap = cap;
        while bucket.free.len() > cap {
            bucket.free.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_size_rounds_to_power_of_two() {
        let pool = BufferPool::new(8);
        assert_eq!(pool.bucket_size_for(1), 256);
        assert_eq!(pool.bucket_size_for(256), 256);
        assert_eq!(pool.bucket_size_for(257), 512);
        assert_eq!(pool.bucket_size_for(4096), 4096);
    }

    #[test]
    fn lru_cap_trims_immediately_on_set() {
        let pool = BufferPool::new(8);
        // Without a device we can't create real buffers; exercise the
        // bucket bookkeeping path directly via set_lru_cap on an empty bucket.
        pool.set_lru_cap(1024, 2);
        let mut buckets = pool.buckets.lock().unwrap();
        let bucket = buckets.get(&1024).unwrap();
        assert_eq!(bucket.lru_cap, 2);
        assert!(bucket.free.is_empty());
    }
}
