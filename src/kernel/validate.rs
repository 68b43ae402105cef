//! Per-dispatch validation shared by every kernel call site (last
//! paragraph): positive/finite dimensions, aligned offsets, buffer sizes that
//! accommodate the requested range, and a 2-D dispatch fold when the 1-D
//! workgroup count would exceed the device's per-dimension limit.

use crate::error::{DopplerError, Result};

pub fn validate_dims(dims: &[i64]) -> Result<()> {
    for &d in dims {
        if d <= 0 {
            return Err(DopplerError::validation(
                format!("dimension must be positive, got {d}"),
                &[],
                &[],
            ));
        }
    }
    Ok(())
}

pub fn validate_offset_alignment(offset: u64, alignment: u64) -> Result<()> {
    if offset % alignment != 0 {
        return Err(DopplerError::validation(
            format!("offset {offset} is not a multiple of alignment {alignment}"),
            &[],
            &[offset],
        ));
    }
    Ok(())
}

pub fn validate_buffer_range(buffer_size: u64, offset: u64, requested_len: u64) -> Result<()> {
    let end = offset
        .checked_add(requested_len)
        .ok_or_else(|| DopplerError::validation("offset + length overflowed u64", &[], &[offset]))?;
    if end > buffer_size {
        return Err(DopplerError::BufferTooSmall {
            required: end,
            actual: buffer_size,
        });
    }
    Ok(())
}

/// Folds a 1-D workgroup count into 2-D `(workgroups_x, workgroups_y)` when it
/// would otherwise exceed `max_per_dimension`. The caller is expected to pass
/// `workgroups_x` to the shader via a uniform and recover the logical index
/// as `gid.y * workgroups_x + gid.x` (or equivalent) inside WGSL.
pub fn fold_dispatch_1d(total_workgroups: u64, max_per_dimension: u32) -> Result<(u32, u32)> {
    if total_workgroups == 0 {
        return Err(DopplerError::validation(
            "dispatch has zero total workgroups",
            &[],
            &[],
        ));
    }
    if total_workgroups <= max_per_dimension as u64 {
        return Ok((total_workgroups as u32, 1));
    }
    let x = max_per_dimension as u64;
    let y = total_workgroups.div_ceil(x);
    if y > max_per_dimension as u64 {
        return Err(DopplerError::DispatchExceedsLimit {
            requested: y as u32,
            max: max_per_dimension,
        });
    }
    Ok((x as u32, y as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_stays_1d_under_limit() {
        assert_eq!(fold_dispatch_1d(100, 65535).unwrap(), (100, 1));
    }

    #[test]
    fn fold_splits_into_2d_over_limit() {
        let (x, y) = fold_dispatch_1d(200_000, 65535).unwrap();
        assert_eq!(x, 65535);
        assert!((x as u64) * (y as u64) >= 200_000);
    }

    #[test]
    fn buffer_range_rejects_overflowing_request() {
        assert!(validate_buffer_range(1024, 900, 256).is_err());
        assert!(validate_buffer_range(1024, 768, 256).is_ok());
    }
}
