//! Q8_0 block-quantized weight decoder.
//!
//! Block of 32 elements, 34 bytes: a 2-byte f16 scale followed by 32 signed
//! 8-bit quants. No sub-block structure, no min term — this is the coarsest
//! and cheapest-to-decode format in the set.

use half::f16;

use crate::error::{DopplerError, Result};

pub const BLOCK_ELEMENTS: usize = 32;
pub const BLOCK_BYTES: usize = 34;

pub fn dequantize_block_f32(bytes: &[u8], out: &mut [f32; BLOCK_ELEMENTS]) -> Result<()> {
    if bytes.len() < BLOCK_BYTES {
        return Err(DopplerError::BufferTooSmall {
            required: BLOCK_BYTES as u64,
            actual: bytes.len() as u64,
        });
    }
    let d = f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
    for (i, o) in out.iter_mut().enumerate() {
        let q = bytes[2 + i] as i8;
        *o = d * q as f32;
    }
    Ok(())
}

pub fn dequantize_f32(bytes: &[u8], num_blocks: usize) -> Result<Vec<f32>> {
    if bytes.len() < num_blocks * BLOCK_BYTES {
        return Err(DopplerError::BufferTooSmall {
            required: (num_blocks * BLOCK_BYTES) as u64,
            actual: bytes.len() as u64,
        });
    }
    let mut out = Vec::with_capacity(num_blocks * BLOCK_ELEMENTS);
    let mut block_out = [0f32; BLOCK_ELEMENTS];
    for b in 0..num_blocks {
        let start = b * BLOCK_BYTES;
        dequantize_block_f32(&bytes[start..start + BLOCK_BYTES], &mut block_out)?;
        out.extend_from_slice(&block_out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_signed_quants_scaled_by_d() {
        let mut bytes = vec![0u8; BLOCK_BYTES];
        bytes[0..2].copy_from_slice(&f16::from_f32(0.25).to_le_bytes());
        bytes[2] = (-5i8) as u8;
        bytes[3] = 100i8 as u8;
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        assert!((out[0] - (0.25 * -5.0)).abs() < 1e-6);
        assert!((out[1] - (0.25 * 100.0)).abs() < 1e-6);
    }

    #[test]
    fn rejects_undersized_buffer() {
        assert!(dequantize_block_f32(&[0u8; 10], &mut [0f32; BLOCK_ELEMENTS]).is_err());
    }
}
