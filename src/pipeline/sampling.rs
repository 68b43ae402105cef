//! Sampling: temperature, top-k, top-p, repetition penalty,
//! multinomial draw from a caller-supplied random value, and the softcap
//! transform shared by attention logits and the LM head.
//!
//! This is pure host-side math over the final logit vector read back from
//! the GPU (the third and last suspension point) — no kernel involved.

use crate::pipeline::config::SamplingConfig;

/// `x -> tanh(x / cap) * cap`, applied to attention logits or final logits
/// when the corresponding config field is set.
pub fn softcap(logits: &mut [f32], cap: f32) {
    for x in logits.iter_mut() {
        *x = (*x / cap).tanh() * cap;
    }
}

/// Index of the largest logit. Ties resolve to the lowest index, matching a
/// left-to-right scalar scan.
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    best_idx as u32
}

/// Divides the probability (or logit) of each id in `recent_tokens` by
/// `penalty` in place, applied before renormalization.
pub fn apply_repetition_penalty(logits: &mut [f32], recent_tokens: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    for &tok in recent_tokens {
        if let Some(slot) = logits.get_mut(tok as usize) {
            if *slot > 0.0 {
                *slot /= penalty;
            } else {
                *slot *= penalty;
            }
        }
    }
}

fn softmax_in_place(logits: &mut [f32]) {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for x in logits.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    if sum > 0.0 {
        for x in logits.iter_mut() {
            *x /= sum;
        }
    }
}

/// Zeroes every probability outside the top `k` (k == 0 disables the filter).
fn apply_top_k(probs: &mut [f32], k: u32) {
    if k == 0 || (k as usize) >= probs.len() {
        return;
    }
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let cutoff = indexed[k as usize - 1].1;
    for p in probs.iter_mut() {
        if *p < cutoff {
            *p = 0.0;
        }
    }
}

/// Zeroes the smallest-probability tail beyond cumulative mass `p` (nucleus
/// sampling). `p >= 1.0` disables the filter.
fn apply_top_p(probs: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut cumulative = 0.0f32;
    let mut cutoff_rank = indexed.len();
    for (rank, &(_, prob)) in indexed.iter().enumerate() {
        cumulative += prob;
        if cumulative >= p {
            cutoff_rank = rank + 1;
            break;
        }
    }
    let kept: std::collections::HashSet<usize> =
        indexed[..cutoff_rank].iter().map(|&(idx, _)| idx).collect();
    for (idx, p) in probs.iter_mut().enumerate() {
        if !kept.contains(&idx) {
            *p = 0.0;
        }
    }
}

fn renormalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
}

/// Draws a token id from `probs` (already renormalized) using `uniform`, a
/// caller-supplied value in `[0, 1)` — the engine never generates its own
/// randomness, matching the cooperative single-threaded model.
fn multinomial_draw(probs: &[f32], uniform: f32) -> u32 {
    let mut cumulative = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if uniform < cumulative {
            return i as u32;
        }
    }
    (probs.len().saturating_sub(1)) as u32
}

/// Full sampling pipeline for one step's logits: temperature 0 takes a
/// fast argmax path; otherwise repetition penalty, temperature scaling,
/// top-k, top-p, renormalize, then a multinomial draw against `uniform`.
pub fn sample(
    logits: &mut [f32],
    config: &SamplingConfig,
    recent_tokens: &[u32],
    uniform: f32,
) -> u32 {
    if config.temperature == 0.0 {
        return argmax(logits);
    }
    apply_repetition_penalty(logits, recent_tokens, config.repetition_penalty);
    for x in logits.iter_mut() {
        *x /= config.temperature;
    }
    softmax_in_place(logits);
    apply_top_k(logits, config.top_k);
    apply_top_p(logits, config.top_p);
    renormalize(logits);
    multinomial_draw(logits, uniform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_the_unique_maximum() {
        assert_eq!(argmax(&[0.1, 0.9, 0.3]), 1);
    }

    #[test]
    fn argmax_breaks_ties_toward_the_lower_index() {
        assert_eq!(argmax(&[0.5, 0.5, 0.1]), 0);
    }

    #[test]
    fn temperature_zero_is_deterministic_argmax() {
        let mut logits = vec![1.0, 5.0, 2.0];
        let cfg = SamplingConfig {
            temperature: 0.0,
            ..SamplingConfig::default()
        };
        assert_eq!(sample(&mut logits, &cfg, &[], 0.999), 1);
    }

    #[test]
    fn softcap_bounds_logits_within_the_cap() {
        let mut logits = vec![1000.0, -1000.0, 0.0];
        softcap(&mut logits, 50.0);
        for &x in &logits {
            assert!(x.abs() <= 50.0 + 1e-4);
        }
    }

    #[test]
    fn top_k_restricts_support_to_k_entries() {
        let mut probs = vec![0.4, 0.3, 0.2, 0.1];
        apply_top_k(&mut probs, 2);
        let nonzero = probs.iter().filter(|&&p| p > 0.0).count();
        assert_eq!(nonzero, 2);
    }

    #[test]
    fn repetition_penalty_reduces_positive_logit_for_seen_token() {
        let mut logits = vec![2.0, 2.0];
        apply_repetition_penalty(&mut logits, &[0], 2.0);
        assert!((logits[0] - 1.0).abs() < 1e-6);
        assert_eq!(logits[1], 2.0);
    }

    #[test]
    fn multinomial_draw_is_deterministic_given_uniform_value() {
        let probs = vec![0.2, 0.3, 0.5];
        assert_eq!(multinomial_draw(&probs, 0.1), 0);
        assert_eq!(multinomial_draw(&probs, 0.4), 1);
        assert_eq!(multinomial_draw(&probs, 0.9), 2);
    }
}
