//! The evaluator boundary of the search, plus the network-backed adapter.

use cz_core::{BoardHistory, Move};
use cz_features::planes::encode;
use cz_features::PolicyMap;
use cz_net::Network;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator backend failed: {0}")]
    Backend(#[from] cz_net::BackendError),
    #[error("move {0} has no policy index")]
    UnmappedMove(String),
}

/// Position evaluation for the search: per-legal-move priors (aligned with
/// `moves`, summing to ~1) and a value in [0, 1] for the side to move.
pub trait Evaluator: Sync {
    fn evaluate(&self, history: &BoardHistory, moves: &[Move])
        -> Result<(Vec<f32>, f32), EvalError>;
}

/// Uniform policy, even value. The baseline stub for tests and plumbing.
pub struct UniformEvaluator;

impl Evaluator for UniformEvaluator {
    fn evaluate(
        &self,
        _history: &BoardHistory,
        moves: &[Move],
    ) -> Result<(Vec<f32>, f32), EvalError> {
        let p = 1.0 / moves.len().max(1) as f32;
        Ok((vec![p; moves.len()], 0.5))
    }
}

/// Softmax over the legal-move logits with a temperature; falls back to
/// uniform when the logits are degenerate.
fn masked_softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits
        .iter()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    if !max.is_finite() {
        return vec![1.0 / logits.len().max(1) as f32; logits.len()];
    }

    let mut out = Vec::with_capacity(logits.len());
    let mut sum = 0.0f32;
    for &l in logits {
        let z = ((l - max) / temperature).exp();
        let z = if z.is_finite() { z } else { 0.0 };
        out.push(z);
        sum += z;
    }
    if !(sum.is_finite() && sum > 0.0) {
        return vec![1.0 / logits.len().max(1) as f32; logits.len()];
    }
    for v in &mut out {
        *v /= sum;
    }
    out
}

/// Adapts the network to the search: encodes the history window, maps each
/// legal move into the flat policy output, and squashes the winrate from
/// [-1, 1] into the [0, 1] scale the tree stores.
pub struct NetEvaluator {
    net: Network,
    map: PolicyMap,
    temperature: f32,
}

impl NetEvaluator {
    pub fn new(net: Network, temperature: f32) -> NetEvaluator {
        let map = PolicyMap::for_version(net.weights().format_version());
        NetEvaluator {
            net,
            map,
            temperature,
        }
    }

    pub fn network(&self) -> &Network {
        &self.net
    }
}

impl Evaluator for NetEvaluator {
    fn evaluate(
        &self,
        history: &BoardHistory,
        moves: &[Move],
    ) -> Result<(Vec<f32>, f32), EvalError> {
        let planes = encode(history, self.net.weights().format_version());
        let (logits, winrate) = self.net.evaluate(&planes)?;

        let stm = history.current().side_to_move();
        let mut move_logits = Vec::with_capacity(moves.len());
        for &mv in moves {
            let idx = self
                .map
                .index_of(mv, stm)
                .ok_or_else(|| EvalError::UnmappedMove(mv.to_string()))?;
            move_logits.push(logits[idx as usize]);
        }

        let priors = masked_softmax(&move_logits, self.temperature);
        Ok((priors, 0.5 * (winrate + 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_evaluator_matches_move_count() {
        let bh = BoardHistory::startpos();
        let moves = bh.legal_moves();
        let (priors, value) = UniformEvaluator.evaluate(&bh, &moves).unwrap();
        assert_eq!(priors.len(), 20);
        assert!((priors.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(value, 0.5);
    }

    #[test]
    fn masked_softmax_normalizes_and_orders() {
        let priors = masked_softmax(&[1.0, 0.0, -1.0], 1.0);
        assert!((priors.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(priors[0] > priors[1] && priors[1] > priors[2]);
    }

    #[test]
    fn masked_softmax_flattens_with_temperature() {
        let cold = masked_softmax(&[1.0, 0.0], 1.0);
        let hot = masked_softmax(&[1.0, 0.0], 10.0);
        assert!(hot[0] < cold[0]);
        assert!(hot[0] > 0.5, "still ordered");
    }

    #[test]
    fn degenerate_logits_fall_back_to_uniform() {
        let priors = masked_softmax(&[f32::NAN, f32::NAN], 1.0);
        assert_eq!(priors, vec![0.5, 0.5]);
        let priors = masked_softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY], 1.0);
        assert_eq!(priors, vec![0.5, 0.5]);
    }
}
