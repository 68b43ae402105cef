//! KV cache: row-major `[position, num_kv_heads · head_dim]`
//! per-layer storage, dense or sliding-window. Writes are a plain
//! buffer-to-buffer copy at a known row offset (`encoder.copy_buffer_to_buffer`),
//! not a dispatched kernel.

use crate::error::{DopplerError, Result};
use crate::gpu::dtype::{Shape, Tensor};
use crate::gpu::recorder::CommandRecorder;
use crate::pipeline::collaborators::LayerType;

/// One layer's K/V storage. `capacity` is the maximum number of positions the
/// backing buffers were sized for; `write_pos` is the next free row.
pub struct KvCache {
    pub k: Tensor,
    pub v: Tensor,
    pub capacity: u32,
    pub write_pos: u32,
    pub sliding_window: Option<u32>,
    row_bytes: u64,
}

impl KvCache {
    pub fn new(k: Tensor, v: Tensor, capacity: u32, sliding_window: Option<u32>) -> Self {
        let row_elems = k.shape.as_slice().get(1).copied().unwrap_or(0) as u64;
        let row_bytes = k
            .dtype
            .bytes_per_element()
            .map(|bpe| row_elems * bpe)
            .unwrap_or(row_elems);
        KvCache {
            k,
            v,
            capacity,
            write_pos: 0,
            sliding_window,
            row_bytes,
        }
    }

    /// Copies `num_tokens` freshly-projected K/V rows into the cache starting
    /// at the current write position, then advances it. The copy is recorded
    /// before any attention dispatch that reads these positions in the same
    /// forward pass.
    pub fn append(
        &mut self,
        recorder: &mut CommandRecorder<'_>,
        k_new: &Tensor,
        v_new: &Tensor,
        num_tokens: u32,
    ) -> Result<()> {
        check_capacity(self.write_pos, num_tokens, self.capacity, self.row_bytes)?;
        let dst_offset = self.write_pos as u64 * self.row_bytes;
        let copy_bytes = num_tokens as u64 * self.row_bytes;
        recorder.copy_buffer(&k_new.buffer.raw, 0, &self.k.buffer.raw, dst_offset, copy_bytes)?;
        recorder.copy_buffer(&v_new.buffer.raw, 0, &self.v.buffer.raw, dst_offset, copy_bytes)?;
        self.write_pos += num_tokens;
        Ok(())
    }

    /// The number of positions attention for `layer_type` should read at the
    /// current write position: the full history for a dense layer, or the
    /// last `sliding_window` positions for a sliding layer.
    pub fn effective_kv_len(&self, layer_type: LayerType) -> u32 {
        effective_kv_len(self.write_pos, self.sliding_window, layer_type)
    }

    pub fn shape_for(capacity: u32, row_elems: u32) -> Shape {
        Shape::from([capacity as usize, row_elems as usize])
    }
}

/// Pure core of [`KvCache::effective_kv_len`], factored out so it can be
/// tested without constructing a GPU-backed cache.
fn effective_kv_len(write_pos: u32, sliding_window: Option<u32>, layer_type: LayerType) -> u32 {
    match (layer_type, sliding_window) {
        (LayerType::SlidingAttention, Some(window)) => write_pos.min(window),
        _ => write_pos,
    }
}

/// Bounds check for [`KvCache::append`], factored out so the monotonic
/// growth and overflow behavior can be tested without a GPU-backed cache.
fn check_capacity(write_pos: u32, num_tokens: u32, capacity: u32, row_bytes: u64) -> Result<()> {
    let end = write_pos as u64 + num_tokens as u64;
    if end > capacity as u64 {
        return Err(DopplerError::BufferTooSmall {
            required: end * row_bytes,
            actual: capacity as u64 * row_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_kv_len_caps_to_window_for_sliding_layers() {
        assert_eq!(effective_kv_len(10, Some(4), LayerType::SlidingAttention), 4);
        assert_eq!(effective_kv_len(10, Some(4), LayerType::FullAttention), 10);
    }

    #[test]
    fn effective_kv_len_before_window_is_reached_is_unclamped() {
        assert_eq!(effective_kv_len(2, Some(4), LayerType::SlidingAttention), 2);
    }

    #[test]
    fn effective_kv_len_with_no_window_configured_is_unclamped() {
        assert_eq!(effective_kv_len(100, None, LayerType::SlidingAttention), 100);
    }

    #[test]
    fn write_pos_accepts_monotonic_appends_up_to_capacity() {
        assert!(check_capacity(0, 4, 8, 16).is_ok());
        assert!(check_capacity(4, 4, 8, 16).is_ok());
    }

    #[test]
    fn append_past_capacity_is_rejected_with_required_and_actual_bytes() {
        let err = check_capacity(6, 4, 8, 16).unwrap_err();
        match err {
            DopplerError::BufferTooSmall { required, actual } => {
                assert_eq!(required, 10 * 16);
                assert_eq!(actual, 8 * 16);
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
    }
}
