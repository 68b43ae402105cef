//! Q6_K block-quantized weight decoder.
//!
//! Super-block of 256 elements, 210 bytes: 128 bytes of packed 4-bit low
//! quants, 64 bytes of packed 2-bit high quants, 16 signed 8-bit per-sub-block
//! scales (16 sub-blocks of 16), and a 2-byte f16 scale at the end.

use half::f16;

use crate::error::{DopplerError, Result};

pub const BLOCK_ELEMENTS: usize = 256;
pub const BLOCK_BYTES: usize = 210;
const SCALE_OFFSET: usize = 192;
const D_OFFSET: usize = 208;

/// Decodes one 210-byte super-block into 256 f32 values, following the
/// two-half (128-element) layout used by both the low and high quant planes.
pub fn dequantize_block_f32(bytes: &[u8], out: &mut [f32; BLOCK_ELEMENTS]) -> Result<()> {
    if bytes.len() < BLOCK_BYTES {
        return Err(DopplerError::BufferTooSmall {
            required: BLOCK_BYTES as u64,
            actual: bytes.len() as u64,
        });
    }
    let ql = &bytes[0..128];
    let qh = &bytes[128..192];
    let sc = &bytes[SCALE_OFFSET..SCALE_OFFSET + 16];
    let d = f16::from_le_bytes([bytes[D_OFFSET], bytes[D_OFFSET + 1]]).to_f32();

    for half in 0..2 {
        let ql_base = half * 64;
        let qh_base = half * 32;
        let sc_base = half * 8;
        let y_base = half * 128;
        for l in 0..32 {
            let is = l / 16;
            let q1 = (((ql[ql_base + l] & 0x0F) | (((qh[qh_base + l] >> 0) & 3) << 4)) as i8 as i32 - 32) as f32;
            let q2 = (((ql[ql_base + l + 32] & 0x0F) | (((qh[qh_base + l] >> 2) & 3) << 4)) as i8 as i32 - 32) as f32;
            let q3 = (((ql[ql_base + l] >> 4) | (((qh[qh_base + l] >> 4) & 3) << 4)) as i8 as i32 - 32) as f32;
            let q4 = (((ql[ql_base + l + 32] >> 4) | (((qh[qh_base + l] >> 6) & 3) << 4)) as i8 as i32 - 32) as f32;

            out[y_base + l] = d * sc[sc_base + is] as i8 as f32 * q1;
            out[y_base + l + 32] = d * sc[sc_base + is + 2] as i8 as f32 * q2;
            out[y_base + l + 64] = d * sc[sc_base + is + 4] as i8 as f32 * q3;
            out[y_base + l + 96] = d * sc[sc_base + is + 6] as i8 as f32 * q4;
        }
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

    fn pack_zero_block(d: f32, scales: [i8; 16]) -> Vec<u8> {
        let mut bytes = vec![0u8; BLOCK_BYTES];
        for (i, s) in scales.iter().enumerate() {
            bytes[SCALE_OFFSET + i] = *s as u8;
        }
        bytes[D_OFFSET..D_OFFSET + 2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        bytes
    }

    #[test]
    fn all_zero_quants_decode_to_the_signed_offset_bias() {
        // ql = qh = 0 everywhere means every reconstructed 6-bit code is 0,
        // so every element should equal d * scale * (0 - 32).
        let scales = [2i8; 16];
        let bytes = pack_zero_block(1.0, scales);
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        for &v in out.iter() {
            assert!((v - (-64.0)).abs() < 1e-3);
        }
    }

    #[test]
    fn full_quant_code_decodes_to_positive_offset() {
        let mut bytes = pack_zero_block(1.0, [1i8; 16]);
        for b in bytes[0..128].iter_mut() {
            *b = 0xFF;
        }
        for b in bytes[128..192].iter_mut() {
            *b = 0xFF;
        }
        let mut out = [0f32; BLOCK_ELEMENTS];
        dequantize_block_f32(&bytes, &mut out).unwrap();
        for &v in out.iter() {
            assert!((v - 31.0).abs() < 1e-3, "{v}");
        }
    }

    #[test]
    fn rejects_undersized_buffer() {
        assert!(dequantize_block_f32(&[0u8; 50], &mut [0f32; BLOCK_ELEMENTS]).is_err());
    }
}
