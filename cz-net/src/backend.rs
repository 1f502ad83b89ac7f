//! The evaluator backend boundary and the statistical self-check.
//!
//! Accelerators plug in behind [`Backend`]; [`SelfChecked`] wraps one and
//! cross-validates a random sample of its answers against the CPU path.
//! Tolerance is a credit counter: correct calls accumulate credit, each
//! tolerated mismatch spends a large slice of it, and a mismatch without
//! credit is fatal. An engine that cannot trust its evaluator must refuse
//! to play rather than move on silently wrong numbers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::forward::CpuBackend;
use crate::loader::Weights;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("accelerator failure: {0}")]
    Accelerator(String),
    #[error("self-check mismatch beyond the accumulated credit")]
    SelfCheckMismatch,
    #[error("self-check retry mismatch: accelerator output is not reproducible")]
    NotReproducible,
}

/// One forward evaluation: dense input planes in, policy logits and the
/// pre-fc2 value activations out.
pub trait Backend: Send + Sync {
    fn forward(&self, input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError>;
    fn describe(&self) -> String;
}

/// Calls between mismatches needed to keep an accelerator trusted.
const SELFCHECK_MIN_EVALS: i64 = 2_000_000;
const RELATIVE_ERROR: f32 = 0.1;
const SMALL_NUMBER: f32 = 1e-3;

/// Relative difference with an underflow floor; sign flips between values
/// of real magnitude count as maximal error.
fn relative_difference(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::MAX;
    }
    let fa = a.abs();
    let fb = b.abs();
    if fa > SMALL_NUMBER && fb > SMALL_NUMBER && (a < 0.0) != (b < 0.0) {
        return f32::MAX;
    }
    let fa = fa.max(SMALL_NUMBER);
    let fb = fb.max(SMALL_NUMBER);
    (((fa - fb) / fa).abs()).max(((fa - fb) / fb).abs())
}

fn outputs_agree(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(&x, &y)| relative_difference(x, y) <= RELATIVE_ERROR)
}

/// Decorator that re-evaluates roughly one call in `probability` on the
/// CPU reference and compares element-wise.
pub struct SelfChecked<B> {
    inner: B,
    reference: CpuBackend,
    probability: u32,
    min_credit: i64,
    credit: AtomicI64,
    rng: Mutex<ChaCha8Rng>,
}

impl<B: Backend> SelfChecked<B> {
    pub fn new(inner: B, weights: Arc<Weights>, probability: u32) -> SelfChecked<B> {
        Self::with_seed(inner, weights, probability, rand::random())
    }

    pub fn with_seed(
        inner: B,
        weights: Arc<Weights>,
        probability: u32,
        seed: u64,
    ) -> SelfChecked<B> {
        let min_credit = (SELFCHECK_MIN_EVALS / probability.max(1) as i64 / 2).max(1);
        SelfChecked {
            inner,
            reference: CpuBackend::new(weights),
            probability: probability.max(1),
            min_credit,
            credit: AtomicI64::new(min_credit),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Remaining mismatch credit; drops toward fatal as errors accumulate.
    pub fn credit(&self) -> i64 {
        self.credit.load(Ordering::Relaxed)
    }

    fn should_check(&self) -> bool {
        let mut rng = self.rng.lock().expect("self-check rng mutex");
        rng.gen_range(0..self.probability) == 0
    }

    /// Compares element-wise, spending credit per tolerated mismatch and
    /// raising `fatal` when a mismatch finds the account empty.
    fn compare_outputs(&self, data: &[f32], reference: &[f32], fatal: &mut bool) -> bool {
        let mut almost_equal = true;
        for (&d, &r) in data.iter().zip(reference) {
            if relative_difference(d, r) > RELATIVE_ERROR {
                almost_equal = false;
                if self.credit.load(Ordering::Relaxed) < self.min_credit {
                    *fatal = true;
                } else {
                    self.credit.fetch_sub(self.min_credit, Ordering::Relaxed);
                }
            }
        }
        almost_equal
    }
}

impl<B: Backend> Backend for SelfChecked<B> {
    fn forward(&self, input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError> {
        let _ = self
            .credit
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some((c + 1).min(3 * self.min_credit))
            });

        let (policy, value) = self.inner.forward(input)?;

        if self.should_check() {
            let (ref_policy, ref_value) = self.reference.forward(input)?;
            let mut fatal = false;
            let mut almost_equal = self.compare_outputs(&policy, &ref_policy, &mut fatal);
            almost_equal &= self.compare_outputs(&value, &ref_value, &mut fatal);

            if !almost_equal {
                // A second run must at least agree with the first; drift
                // that does not reproduce is untrustworthy outright.
                let (retry_policy, retry_value) = self.inner.forward(input)?;
                if !outputs_agree(&retry_policy, &policy) || !outputs_agree(&retry_value, &value) {
                    return Err(BackendError::NotReproducible);
                }
                if fatal {
                    return Err(BackendError::SelfCheckMismatch);
                }
            }
        }

        Ok((policy, value))
    }

    fn describe(&self) -> String {
        format!("{} (self-checked against cpu)", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Weights;
    use crate::testutil::{zero_weights_text, NetShape};
    use std::sync::atomic::AtomicU64;

    fn tiny_weights() -> Arc<Weights> {
        Arc::new(Weights::from_text(&zero_weights_text(&NetShape::tiny())).unwrap())
    }

    /// Fake accelerator: zeros, except inputs whose first element is set,
    /// which get one corrupted policy output. Deterministic per input, so
    /// retries reproduce.
    struct FlakyBackend {
        policy_len: usize,
        value_len: usize,
    }

    impl Backend for FlakyBackend {
        fn forward(&self, input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError> {
            let mut policy = vec![0.0f32; self.policy_len];
            if input[0] > 0.5 {
                policy[0] = 1.0;
            }
            Ok((policy, vec![0.0f32; self.value_len]))
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    /// Fake accelerator corrupting ten outputs on every single call.
    struct SaboteurBackend {
        policy_len: usize,
        value_len: usize,
    }

    impl Backend for SaboteurBackend {
        fn forward(&self, _input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError> {
            let mut policy = vec![0.0f32; self.policy_len];
            for slot in policy.iter_mut().take(10) {
                *slot = 1.0;
            }
            Ok((policy, vec![0.0f32; self.value_len]))
        }

        fn describe(&self) -> String {
            "saboteur".to_string()
        }
    }

    /// Fake accelerator that never answers the same thing twice.
    struct NoisyBackend {
        policy_len: usize,
        value_len: usize,
        calls: AtomicU64,
    }

    impl Backend for NoisyBackend {
        fn forward(&self, _input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            let mut policy = vec![0.0f32; self.policy_len];
            policy[0] = if n % 2 == 0 { 5.0 } else { -5.0 };
            Ok((policy, vec![0.0f32; self.value_len]))
        }

        fn describe(&self) -> String {
            "noisy".to_string()
        }
    }

    #[test]
    fn relative_difference_semantics() {
        assert_eq!(relative_difference(f32::NAN, 1.0), f32::MAX);
        assert_eq!(relative_difference(0.5, -0.5), f32::MAX, "sign flip");
        // Both below the floor: clamped equal.
        assert_eq!(relative_difference(0.0005, 0.0009), 0.0);
        assert!(relative_difference(1.0, 1.05) < RELATIVE_ERROR);
        assert!(relative_difference(1.0, 1.2) > RELATIVE_ERROR);
    }

    #[test]
    fn occasional_corruption_stays_within_credit() {
        let weights = tiny_weights();
        let checked = SelfChecked::with_seed(
            FlakyBackend {
                policy_len: weights.policy_outputs(),
                value_len: weights.value_channels(),
            },
            weights.clone(),
            2000,
            42,
        );

        let clean = vec![0.0f32; weights.input_channels() * 64];
        let mut marked = clean.clone();
        marked[0] = 1.0;

        for call in 0..100_000u32 {
            let input = if call % 500 == 0 { &marked } else { &clean };
            checked
                .forward(input)
                .unwrap_or_else(|e| panic!("fatal at call {}: {}", call, e));
        }
        assert!(checked.credit() > 0);
    }

    #[test]
    fn persistent_corruption_is_fatal() {
        let weights = tiny_weights();
        let checked = SelfChecked::with_seed(
            SaboteurBackend {
                policy_len: weights.policy_outputs(),
                value_len: weights.value_channels(),
            },
            weights.clone(),
            2000,
            7,
        );

        let input = vec![0.0f32; weights.input_channels() * 64];
        let mut failed = None;
        for call in 0..100_000u32 {
            if let Err(e) = checked.forward(&input) {
                failed = Some((call, e));
                break;
            }
        }
        let (_, error) = failed.expect("saboteur must be caught");
        assert!(matches!(error, BackendError::SelfCheckMismatch));
    }

    #[test]
    fn non_reproducible_drift_is_fatal_immediately() {
        let weights = tiny_weights();
        // probability 1: check every call.
        let checked = SelfChecked::with_seed(
            NoisyBackend {
                policy_len: weights.policy_outputs(),
                value_len: weights.value_channels(),
                calls: AtomicU64::new(0),
            },
            weights.clone(),
            1,
            1,
        );

        let input = vec![0.0f32; weights.input_channels() * 64];
        assert!(matches!(
            checked.forward(&input),
            Err(BackendError::NotReproducible)
        ));
    }

    #[test]
    fn clean_backend_passes_indefinitely() {
        let weights = tiny_weights();
        let checked = SelfChecked::with_seed(
            CpuBackend::new(weights.clone()),
            weights.clone(),
            1,
            3,
        );
        let input = vec![0.0f32; weights.input_channels() * 64];
        for _ in 0..32 {
            checked.forward(&input).unwrap();
        }
        assert_eq!(checked.credit(), 1_000_000 + 32);
    }
}
