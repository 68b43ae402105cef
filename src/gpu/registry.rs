//! Process-wide buffer-dtype registry.
//!
//! DESIGN.md's re-architecture notes move dtype metadata onto the
//! [`crate::gpu::dtype::Tensor`] wrapper so kernels no longer need a side
//! table keyed by buffer identity. This registry is kept for the one case
//! the wrapper doesn't cover: a buffer that briefly exists only as a raw
//! `wgpu::Buffer` (freshly uploaded by the weight loader, before it is wrapped
//! in a `Tensor`) still needs its authoritative dtype recorded somewhere the
//! selector can consult. Every other call site should prefer the `Tensor`'s
//! own `dtype` field over looking here.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::gpu::dtype::DType;

#[derive(Clone, Copy, Debug)]
pub struct DtypeRecord {
    pub dtype: DType,
    pub column_major: bool,
}

#[derive(Default)]
pub struct BufferDtypeRegistry {
    entries: Mutex<HashMap<u64, DtypeRecord>>,
}

impl BufferDtypeRegistry {
    pub fn new() -> Self {
        BufferDtypeRegistry::default()
    }

    /// Called on kernel completion to record the authoritative dtype of a
    /// buffer identified by its pool generation (a stand-in for a stable
    /// buffer identity — see `PooledBuffer::generation`).
    pub fn set(&self, buffer_generation: u64, dtype: DType, column_major: bool) {
        self.entries
            .lock()
            .unwrap()
            .insert(buffer_generation, DtypeRecord { dtype, column_major });
    }

    pub fn get(&self, buffer_generation: u64) -> Option<DtypeRecord> {
        self.entries.lock().unwrap().get(&buffer_generation).copied()
    }

    /// Cleared when the underlying buffer is released back to the pool —
    /// a reissued buffer must not inherit a stale dtype.
    pub fn clear(&self, buffer_generation: u64) {
        self.entries.lock().unwrap().remove(&buffer_generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_roundtrip() {
        let reg = BufferDtypeRegistry::new();
        reg.set(7, DType::Q4K, false);
        assert_eq!(reg.get(7).unwrap().dtype, DType::Q4K);
        reg.clear(7);
        assert!(reg.get(7).is_none());
    }
}
