//! CPU-reference activations. The GPU FFN kernel
//! must agree with these within `maxAbs < 1e-4`.

pub fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + ((2.0 / std::f32::consts::PI).sqrt() * (x + 0.044715 * x.powi(3))).tanh())
}

/// `silu(gate) * up`, optionally clipped to `[-limit, limit]` before the
/// multiply when `swiglu_limit` is configured.
pub fn swiglu(gate: f32, up: f32, limit: Option<f32>) -> f32 {
    let gate = match limit {
        Some(l) => gate.clamp(-l, l),
        None => gate,
    };
    silu(gate) * up
}

pub fn geglu(gate: f32, up: f32, limit: Option<f32>) -> f32 {
    let gate = match limit {
        Some(l) => gate.clamp(-l, l),
        None => gate,
    };
    gelu(gate) * up
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silu_is_zero_at_origin() {
        assert!(silu(0.0).abs() < 1e-6);
    }

    #[test]
    fn silu_approaches_identity_for_large_positive_input() {
        assert!((silu(20.0) - 20.0).abs() < 1e-3);
    }

    #[test]
    fn swiglu_limit_clips_the_gate_before_silu() {
        let unclipped = swiglu(100.0, 1.0, None);
        let clipped = swiglu(100.0, 1.0, Some(5.0));
        assert!((clipped - silu(5.0)).abs() < 1e-6);
        assert!(unclipped > clipped);
    }

    #[test]
    fn gelu_is_approximately_zero_at_origin() {
        assert!(gelu(0.0).abs() < 1e-6);
    }
}
