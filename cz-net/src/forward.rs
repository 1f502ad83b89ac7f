//! CPU forward pass and the network facade.

use std::sync::Arc;

use cz_features::planes::{materialize, InputPlane};

use crate::backend::{Backend, BackendError};
use crate::kernels::{batchnorm, gemm, innerproduct};
use crate::loader::Weights;
use crate::winograd::{convolve3, TILES, WINOGRAD_TILE};

/// Reference evaluation path: the Winograd tower and both heads up to the
/// pre-fc2 value activations.
pub struct CpuBackend {
    weights: Arc<Weights>,
}

impl CpuBackend {
    pub fn new(weights: Arc<Weights>) -> CpuBackend {
        CpuBackend { weights }
    }

    fn forward_cpu(&self, input: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let w = &self.weights;
        let channels = w.channels();
        debug_assert_eq!(input.len(), w.input_channels() * 64);

        // The input convolution may be wider on the inside than the tower.
        let max_channels = channels.max(w.input_channels());
        let mut v = vec![0.0f32; WINOGRAD_TILE * max_channels * TILES];
        let mut m = vec![0.0f32; WINOGRAD_TILE * channels * TILES];

        let mut conv_out = vec![0.0f32; channels * 64];
        let mut conv_in = vec![0.0f32; channels * 64];
        let mut res = vec![0.0f32; channels * 64];

        let layers = &w.conv_layers;
        convolve3(
            channels,
            input,
            &layers[0].filter_u,
            &mut v,
            &mut m,
            &mut conv_out,
        );
        batchnorm(
            channels,
            64,
            &mut conv_out,
            &layers[0].bn_means,
            &layers[0].bn_stddevs,
            None,
        );

        for pair in layers[1..].chunks_exact(2) {
            std::mem::swap(&mut conv_out, &mut conv_in);
            res.copy_from_slice(&conv_in);
            convolve3(
                channels,
                &conv_in,
                &pair[0].filter_u,
                &mut v,
                &mut m,
                &mut conv_out,
            );
            batchnorm(
                channels,
                64,
                &mut conv_out,
                &pair[0].bn_means,
                &pair[0].bn_stddevs,
                None,
            );

            std::mem::swap(&mut conv_out, &mut conv_in);
            convolve3(
                channels,
                &conv_in,
                &pair[1].filter_u,
                &mut v,
                &mut m,
                &mut conv_out,
            );
            batchnorm(
                channels,
                64,
                &mut conv_out,
                &pair[1].bn_means,
                &pair[1].bn_stddevs,
                Some(&res),
            );
        }

        // Heads: a 1x1 convolution over 64 squares is a plain GEMM.
        let pol_planes = w.policy_planes();
        let mut policy_data = vec![0.0f32; pol_planes * 64];
        gemm(
            false,
            false,
            pol_planes,
            64,
            channels,
            1.0,
            &w.conv_pol.weights,
            channels,
            &conv_out,
            64,
            0.0,
            &mut policy_data,
            64,
        );
        batchnorm(
            pol_planes,
            64,
            &mut policy_data,
            &w.conv_pol.bn_means,
            &w.conv_pol.bn_stddevs,
            None,
        );

        let val_planes = w.value_planes();
        let mut value_data = vec![0.0f32; val_planes * 64];
        gemm(
            false,
            false,
            val_planes,
            64,
            channels,
            1.0,
            &w.conv_val.weights,
            channels,
            &conv_out,
            64,
            0.0,
            &mut value_data,
            64,
        );
        batchnorm(
            val_planes,
            64,
            &mut value_data,
            &w.conv_val.bn_means,
            &w.conv_val.bn_stddevs,
            None,
        );

        let mut policy_out = vec![0.0f32; w.policy_outputs()];
        innerproduct(
            w.policy_outputs(),
            &policy_data,
            &w.ip_pol_w,
            &w.ip_pol_b,
            &mut policy_out,
            false,
        );

        let value_channels = w.value_channels();
        let mut value_out = vec![0.0f32; value_channels];
        innerproduct(
            value_channels,
            &value_data,
            &w.ip1_val_w,
            &w.ip1_val_b,
            &mut value_out,
            true,
        );

        (policy_out, value_out)
    }
}

impl Backend for CpuBackend {
    fn forward(&self, input: &[f32]) -> Result<(Vec<f32>, Vec<f32>), BackendError> {
        Ok(self.forward_cpu(input))
    }

    fn describe(&self) -> String {
        format!(
            "cpu v{} ({} channels, {} blocks)",
            self.weights.format_version().number(),
            self.weights.channels(),
            self.weights.blocks()
        )
    }
}

/// The evaluator: materializes sparse planes, runs a backend and finishes
/// the value head. Immutable after construction, safe to share across
/// worker threads.
pub struct Network {
    weights: Arc<Weights>,
    backend: Box<dyn Backend>,
}

impl Network {
    /// CPU-only evaluator.
    pub fn cpu(weights: Weights) -> Network {
        let weights = Arc::new(weights);
        let backend = Box::new(CpuBackend::new(weights.clone()));
        Network { weights, backend }
    }

    /// Evaluator over a caller-supplied backend (an accelerator, usually
    /// wrapped in [`crate::SelfChecked`]).
    pub fn with_backend(weights: Arc<Weights>, backend: Box<dyn Backend>) -> Network {
        Network { weights, backend }
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Raw policy logits plus the winrate in [-1, 1] for the side to move.
    pub fn evaluate(&self, planes: &[InputPlane]) -> Result<(Vec<f32>, f32), BackendError> {
        let mut input = vec![0.0f32; planes.len() * 64];
        materialize(planes, &mut input);
        let (policy_logits, value_act) = self.backend.forward(&input)?;

        let mut winrate_out = [0.0f32; 1];
        innerproduct(
            1,
            &value_act,
            &self.weights.ip2_val_w,
            &[self.weights.ip2_val_b],
            &mut winrate_out,
            false,
        );
        Ok((policy_logits, winrate_out[0].tanh()))
    }
}
