//! Tensor element dtypes and the authoritative dtype/layout wrapper around a
//! pool buffer handle.
//!
//! Dtype lives on the [`Tensor`] wrapper itself rather than a process-wide
//! side table keyed by buffer identity; see DESIGN.md's re-architecture notes.

use std::sync::Arc;

/// Element dtype of a tensor view: an explicit, exhaustively-matched enum
/// rather than a raw wgpu type, so kernel selection can switch on it without
/// reaching into wgpu.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    Bf16,
    Q4K,
    Q6K,
    Q8_0,
    MxFp4,
    I32,
    U32,
}

impl DType {
    /// Bytes per element for dense dtypes. Block-quantized dtypes have no
    /// fixed per-element size; use [`DType::block_layout`] instead.
    pub fn bytes_per_element(self) -> Option<u64> {
        match self {
            DType::F32 | DType::I32 | DType::U32 => Some(4),
            DType::F16 | DType::Bf16 => Some(2),
            DType::Q4K | DType::Q6K | DType::Q8_0 | DType::MxFp4 => None,
        }
    }

    pub fn is_quantized(self) -> bool {
        matches!(self, DType::Q4K | DType::Q6K | DType::Q8_0 | DType::MxFp4)
    }

    /// (block size in elements, block size in bytes) for quantized dtypes.
    pub fn block_layout(self) -> Option<(usize, usize)> {
        match self {
            DType::Q4K => Some((256, 144)),
            DType::Q6K => Some((256, 210)),
            DType::Q8_0 => Some((32, 34)),
            DType::MxFp4 => Some((32, 17)),
            _ => None,
        }
    }

    /// Minimum byte length of a buffer holding `shape` elements of this dtype,
    /// rounded up to `alignment` (see [`Tensor`] invariant).
    pub fn min_byte_length(self, element_count: u64, alignment: u64) -> u64 {
        let raw = match self.bytes_per_element() {
            Some(bpe) => element_count * bpe,
            None => {
                let (block_elems, block_bytes) = self
                    .block_layout()
                    .expect("quantized dtype always has a block layout");
                let blocks = element_count.div_ceil(block_elems as u64);
                blocks * block_bytes as u64
            }
        };
        raw.div_ceil(alignment) * alignment
    }
}

/// A short, stack-friendly dimension vector. Tensors in this engine rarely
/// exceed 4 dimensions (batch, seq, heads, head_dim).
pub type Shape = smallvec_like::ShapeVec;

/// Minimal inline small-vector so we don't pull in the `smallvec` crate for a
/// 4-element vector; kept in its own submodule to keep `Shape`'s definition
/// visually separate from its backing storage.
mod smallvec_like {
    #[derive(Clone, Debug, PartialEq, Eq, Default)]
    pub struct ShapeVec(Vec<usize>);

    impl ShapeVec {
        pub fn product(&self) -> u64 {
            self.0.iter().map(|&d| d as u64).product::<u64>().max(if self.0.is_empty() { 0 } else { 1 })
        }

        pub fn as_slice(&self) -> &[usize] {
            &self.0
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl From<Vec<usize>> for ShapeVec {
        fn from(v: Vec<usize>) -> Self {
            ShapeVec(v)
        }
    }

    impl<const N: usize> From<[usize; N]> for ShapeVec {
        fn from(v: [usize; N]) -> Self {
            ShapeVec(v.to_vec())
        }
    }

    impl std::ops::Index<usize> for ShapeVec {
        type Output = usize;
        fn index(&self, idx: usize) -> &usize {
            &self.0[idx]
        }
    }
}

/// A view over a pooled GPU buffer: (handle, dtype, shape, layout, label).
/// Non-owning — the backing buffer is released through [`crate::gpu::pool::BufferPool`]
/// or automatically at a recorder's submission boundary.
#[derive(Clone)]
pub struct Tensor {
    pub buffer: Arc<super::pool::PooledBuffer>,
    pub dtype: DType,
    pub shape: Shape,
    /// Row-major unless set; column-major weights occur for some loader layouts.
    pub column_major: bool,
    pub label: Arc<str>,
}

impl Tensor {
    pub fn new(
        buffer: Arc<super::pool::PooledBuffer>,
        dtype: DType,
        shape: impl Into<Shape>,
        column_major: bool,
        label: impl Into<Arc<str>>,
    ) -> Self {
        Tensor {
            buffer,
            dtype,
            shape: shape.into(),
            column_major,
            label: label.into(),
        }
    }

    pub fn element_count(&self) -> u64 {
        self.shape.product()
    }

    /// Validates the byte-length invariant: backing buffer size must be
    /// at least `product(shape) * bytes_per_element(dtype)` rounded to alignment.
    pub fn validate(&self, alignment: u64) -> crate::error::Result<()> {
        let required = self.dtype.min_byte_length(self.element_count(), alignment);
        if self.buffer.size < required {
            return Err(crate::error::DopplerError::BufferTooSmall {
                required,
                actual: self.buffer.size,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("label", &self.label)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape.as_slice())
            .field("column_major", &self.column_major)
            .finish()
    }
}
