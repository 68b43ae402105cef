//! Rotary position embedding:
//! theta selection (`rope_theta` vs `rope_local_theta` by layer type),
//! scaling, and the CPU reference rotation the GPU kernel must match.

use crate::pipeline::collaborators::LayerType;
use crate::pipeline::config::{RopeConfig, RopeScaling};

/// Picks `theta` for a layer: sliding/local layers use `local_theta` when the
/// model declares one, falling back to the global `theta` otherwise (
/// "apply RoPE with θ selected from `rope_theta` or `rope_local_theta` based
/// on layer type").
pub fn select_theta(config: &RopeConfig, layer_type: LayerType) -> f32 {
    match (layer_type, config.local_theta) {
        (LayerType::SlidingAttention, Some(local)) => local,
        _ => config.theta,
    }
}

/// Linear scaling divides the effective position by `scaling_factor` rather
/// than touching theta.
pub fn position_scale(config: &RopeConfig) -> f32 {
    match config.scaling_type {
        Some(RopeScaling::Linear) => 1.0 / config.scaling_factor,
        _ => 1.0,
    }
}

/// Dynamic NTK and YaRN scaling both stretch the effective base instead of
/// the position; this crate applies `scaling_factor` as a direct multiplier
/// on theta for both, which is a simplification of the full NTK/YaRN
/// formulas (those also need the model's original vs. target context
/// length, which isn't part of this configuration surface — see DESIGN.md).
pub fn effective_theta(config: &RopeConfig, layer_type: LayerType) -> f32 {
    let theta = select_theta(config, layer_type);
    match config.scaling_type {
        Some(RopeScaling::Dynamic) | Some(RopeScaling::Yarn) => theta * config.scaling_factor,
        _ => theta,
    }
}

/// Rotates one head's `head_dim` values in place at `position`, pairing
/// element `i` with `i + head_dim/2` (the "rotate half" convention).
pub fn apply_rope_cpu(head: &mut [f32], position: f32, theta: f32) {
    let head_dim = head.len();
    let half = head_dim / 2;
    for i in 0..half {
        let freq = 1.0 / theta.powf((2 * i) as f32 / head_dim as f32);
        let angle = position * freq;
        let (sin, cos) = angle.sin_cos();
        let a = head[i];
        let b = head[i + half];
        head[i] = a * cos - b * sin;
        head[i + half] = a * sin + b * cos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_position_is_a_no_op() {
        let mut head = vec![1.0, 2.0, 3.0, 4.0];
        let before = head.clone();
        apply_rope_cpu(&mut head, 0.0, 10_000.0);
        for (a, b) in head.iter().zip(before.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn rotation_preserves_total_norm() {
        let mut head = vec![1.0, 0.5, -2.0, 3.0];
        let norm_before: f32 = head.iter().map(|v| v.powi(2)).sum();
        apply_rope_cpu(&mut head, 3.0, 10_000.0);
        let norm_after: f32 = head.iter().map(|v| v.powi(2)).sum();
        assert!((norm_before - norm_after).abs() < 1e-3);
    }

    #[test]
    fn select_theta_prefers_local_theta_for_sliding_layers() {
        let cfg = RopeConfig {
            theta: 10_000.0,
            local_theta: Some(1_000.0),
            scaling_type: None,
            scaling_factor: 1.0,
        };
        assert_eq!(select_theta(&cfg, LayerType::SlidingAttention), 1_000.0);
        assert_eq!(select_theta(&cfg, LayerType::FullAttention), 10_000.0);
    }

    #[test]
    fn linear_scaling_shrinks_effective_position_not_theta() {
        let cfg = RopeConfig {
            theta: 10_000.0,
            local_theta: None,
            scaling_type: Some(RopeScaling::Linear),
            scaling_factor: 4.0,
        };
        assert_eq!(effective_theta(&cfg, LayerType::FullAttention), 10_000.0);
        assert!((position_scale(&cfg) - 0.25).abs() < 1e-6);
    }
}
