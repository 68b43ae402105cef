//! MXFP4 (OCP microscaling FP4 e2m1) block decoder.
//!
//! Block of 32 elements, 17 bytes: a 1-byte shared E8M0 exponent followed by
//! 16 bytes of packed 4-bit FP4 (e2m1) elements. Each element's value is the
//! FP4 lookup value times `2^(exponent_byte - 127)`.

use crate::error::{DopplerError, Result};

pub const BLOCK_ELEMENTS: usize = 32;
pub const BLOCK_BYTES: usize = 17;
const E8M0_BIAS: i32 = 127;

/// e2m1 nibble -> value, indexed by the raw 4-bit code (sign in bit 3).
const FP4_LUT: [f32; 16] = [
    0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0, -0.0, -0.5, -1.0, -1.5, -2.0, -3.0, -4.0, -6.0,
];

pub fn dequantize_block_f32(bytes: &[u8], out: &mut [f32; BLOCK_ELEMENTS]) -> Result<()> {
    if bytes.len() < BLOCK_BYTES {
        return Err(DopplerError::BufferTooSmall {
            required: BLOCK_BYTES as u64,
            actual: bytes.len() as u64,
        });
    }
    let exponent = bytes[0] as i32 - E8M0_BIAS;
    let scale = 2f32.powi(exponent);
    let packed = &bytes[1..17];
    for i in 0..16 {
        let byte = packed[i];
        out[i * 2] = FP4_LUT[(byte & 0x0F) as usize] * scale;
        out[i * 2 + 1] = FP4_LUT[(byte >> 4) as usize] * scale;
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
    fn zero_exponent_byte_gives_unit_scale() {
        let mut bytes = vec![0u8; BLOCK_BYTES];
        bytes[0] = E8M0_BIAS as u8; // exponent field 127 -> 2^0 = 1.0
        bytes[1] = 0x21; // lo nibble 1 -> 0.5, hi nibble 2 -> 1.0
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn exponent_byte_scales_all_elements() {
        let mut bytes = vec![0u8; BLOCK_BYTES];
        bytes[0] = (E8M0_BIAS + 2) as u8; // 2^2 = 4.0
        bytes[1] = 0x11; // both nibbles -> 0.5
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn sign_bit_negates_value() {
        let mut bytes = vec![0u8; BLOCK_BYTES];
        bytes[0] = E8M0_BIAS as u8;
        bytes[1] = 0x9a; // lo nibble 0xa=-1.0, hi nibble 9 -> wait hi is 0x9
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        assert!((out[0] - (-1.0)).abs() < 1e-6);
        assert!((out[1] - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn rejects_undersized_buffer() {
        assert!(dequantize_block_f32(&[0u8; 5], &mut [0f32; BLOCK_ELEMENTS]).is_err());
    }
}
