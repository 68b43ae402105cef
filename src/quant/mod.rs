//! Block-quantized weight formats and their CPU reference decoders.
//!
//! These are the oracles the on-device dequant kernels are checked against;
//! nothing here runs on the GPU. Each sub-module owns one format's byte
//! layout and block size, matching [`crate::gpu::dtype::DType::block_layout`].

pub mod mxfp4;
pub mod q4k;
pub mod q6k;
pub mod q8_0;

use crate::error::{DopplerError, Result};
use crate::gpu::dtype::DType;

/// Dequantizes `num_blocks` contiguous blocks of `format` into f32, dispatching
/// to the matching codec. `format` must be one of the quantized variants.
pub fn dequantize_f32(format: DType, bytes: &[u8], num_blocks: usize) -> Result<Vec<f32>> {
    match format {
        DType::Q4K => q4k::dequantize_f32(bytes, num_blocks),
        DType::Q6K => q6k::dequantize_f32(bytes, num_blocks),
        DType::Q8_0 => q8_0::dequantize_f32(bytes, num_blocks),
        DType::MxFp4 => mxfp4::dequantize_f32(bytes, num_blocks),
        other => Err(DopplerError::Validation {
            message: format!("{other:?} is not a quantized format"),
            dims: Vec::new(),
            offsets: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rejects_non_quantized_format() {
        assert!(dequantize_f32(DType::F32, &[], 0).is_err());
    }

    #[test]
    fn dispatch_routes_to_the_matching_codec_block_size() {
        let bytes = vec![0u8; q8_0::BLOCK_BYTES * 3];
        let out = dequantize_f32(DType::Q8_0, &bytes, 3).unwrap();
        assert_eq!(out.len(), q8_0::BLOCK_ELEMENTS * 3);
    }
}
