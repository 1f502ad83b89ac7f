//! Weight-file loading.
//!
//! The format is UTF-8 text, optionally gzipped: one version line, then
//! whitespace-separated float lines. Layer count and channel width are
//! detected from the line structure; filters are Winograd-pre-transformed
//! and convolution biases folded into the batch-norm means, so inference
//! never touches a bias again.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use thiserror::Error;

use cz_features::schema::FormatVersion;

use crate::winograd::transform_filter;

const BN_EPSILON: f32 = 1e-5;
/// Version line + 4 input-convolution lines + 14 head lines.
const NON_RESIDUAL_LINES: usize = 1 + 4 + 14;
/// Weight lines per residual block (two convolutions).
const LINES_PER_BLOCK: usize = 8;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read weights file: {0}")]
    Io(#[from] std::io::Error),
    #[error("weights file is empty")]
    Empty,
    #[error("weights file is the wrong version: {0:?}")]
    BadVersion(String),
    #[error("failed to parse weights file at line {line}")]
    Parse { line: usize },
    #[error("inconsistent number of weight lines ({lines}) for a residual tower")]
    Inconsistent { lines: usize },
    #[error("weights are malformed: {0}")]
    Malformed(&'static str),
}

/// One 3x3 convolution with its batch norm, ready for inference: the
/// filter is the transformed `U[xi, nu, c, o]` tensor, the bias is already
/// folded into `bn_means`.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    pub filter_u: Vec<f32>,
    pub bn_means: Vec<f32>,
    pub bn_stddevs: Vec<f32>,
}

/// A 1x1 head convolution with its batch norm, bias folded like the tower.
#[derive(Debug, Clone)]
pub struct HeadConv {
    pub weights: Vec<f32>,
    pub bn_means: Vec<f32>,
    pub bn_stddevs: Vec<f32>,
}

/// Immutable network weights; built once, then only shared.
#[derive(Debug, Clone)]
pub struct Weights {
    version: FormatVersion,
    channels: usize,
    blocks: usize,

    /// Input convolution followed by `2 * blocks` residual convolutions.
    pub conv_layers: Vec<ConvLayer>,

    pub conv_pol: HeadConv,
    pub ip_pol_w: Vec<f32>,
    pub ip_pol_b: Vec<f32>,

    pub conv_val: HeadConv,
    pub ip1_val_w: Vec<f32>,
    pub ip1_val_b: Vec<f32>,
    pub ip2_val_w: Vec<f32>,
    pub ip2_val_b: f32,
}

/// `w <- 1 / sqrt(w + eps)`: variances to the reciprocal stddevs the
/// batch-norm kernel consumes.
fn process_bn_var(weights: &mut [f32]) {
    for w in weights {
        *w = 1.0 / (*w + BN_EPSILON).sqrt();
    }
}

fn parse_floats(line: &str, line_no: usize) -> Result<Vec<f32>, LoadError> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|_| LoadError::Parse { line: line_no })
        })
        .collect()
}

impl Weights {
    /// Load from a file, transparently gunzipping when the gzip magic bytes
    /// lead the stream.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Weights, LoadError> {
        let raw = std::fs::read(path)?;
        let text = if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = GzDecoder::new(&raw[..]);
            let mut out = String::new();
            decoder.read_to_string(&mut out)?;
            out
        } else {
            String::from_utf8(raw)
                .map_err(|_| LoadError::Malformed("weights file is not UTF-8 text"))?
        };
        Weights::from_text(&text)
    }

    pub fn from_text(text: &str) -> Result<Weights, LoadError> {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let Some((&version_line, weight_lines)) = lines.split_first() else {
            return Err(LoadError::Empty);
        };

        let version_number: u32 = version_line
            .trim()
            .parse()
            .map_err(|_| LoadError::BadVersion(version_line.trim().to_string()))?;
        let version = FormatVersion::from_number(version_number)
            .ok_or_else(|| LoadError::BadVersion(version_line.trim().to_string()))?;

        // The input convolution's bias line carries one float per filter, so
        // its token count is the tower width.
        let channels = weight_lines
            .get(1)
            .map(|l| l.split_whitespace().count())
            .unwrap_or(0);
        if channels == 0 {
            return Err(LoadError::Inconsistent {
                lines: lines.len(),
            });
        }

        let residual_lines = (lines.len()).checked_sub(NON_RESIDUAL_LINES);
        let blocks = match residual_lines {
            Some(n) if n % LINES_PER_BLOCK == 0 => n / LINES_PER_BLOCK,
            _ => {
                return Err(LoadError::Inconsistent {
                    lines: lines.len(),
                })
            }
        };

        let plain_conv_layers = 1 + 2 * blocks;
        let plain_conv_wts = plain_conv_layers * 4;

        let mut conv_weights: Vec<Vec<f32>> = Vec::with_capacity(plain_conv_layers);
        let mut conv_biases: Vec<Vec<f32>> = Vec::with_capacity(plain_conv_layers);
        let mut bn_means: Vec<Vec<f32>> = Vec::with_capacity(plain_conv_layers);
        let mut bn_stddevs: Vec<Vec<f32>> = Vec::with_capacity(plain_conv_layers);

        let mut conv_pol_w = Vec::new();
        let mut conv_pol_b = Vec::new();
        let mut bn_pol_mean = Vec::new();
        let mut bn_pol_stddev = Vec::new();
        let mut ip_pol_w = Vec::new();
        let mut ip_pol_b = Vec::new();

        let mut conv_val_w = Vec::new();
        let mut conv_val_b = Vec::new();
        let mut bn_val_mean = Vec::new();
        let mut bn_val_stddev = Vec::new();
        let mut ip1_val_w = Vec::new();
        let mut ip1_val_b = Vec::new();
        let mut ip2_val_w = Vec::new();
        let mut ip2_val_b_line = Vec::new();

        for (i, line) in weight_lines.iter().enumerate() {
            // +1 for the version line, +1 for one-based reporting.
            let mut weights = parse_floats(line, i + 2)?;
            if i < plain_conv_wts {
                match i % 4 {
                    0 => conv_weights.push(weights),
                    1 => conv_biases.push(weights),
                    2 => bn_means.push(weights),
                    _ => {
                        process_bn_var(&mut weights);
                        bn_stddevs.push(weights);
                    }
                }
            } else {
                match i - plain_conv_wts {
                    0 => conv_pol_w = weights,
                    1 => conv_pol_b = weights,
                    2 => bn_pol_mean = weights,
                    3 => {
                        process_bn_var(&mut weights);
                        bn_pol_stddev = weights;
                    }
                    4 => ip_pol_w = weights,
                    5 => ip_pol_b = weights,
                    6 => conv_val_w = weights,
                    7 => conv_val_b = weights,
                    8 => bn_val_mean = weights,
                    9 => {
                        process_bn_var(&mut weights);
                        bn_val_stddev = weights;
                    }
                    10 => ip1_val_w = weights,
                    11 => ip1_val_b = weights,
                    12 => ip2_val_w = weights,
                    _ => ip2_val_b_line = weights,
                }
            }
        }

        if bn_pol_mean.len() != conv_pol_b.len() || bn_val_mean.len() != conv_val_b.len() {
            return Err(LoadError::Malformed(
                "incorrect number of policy/value output planes",
            ));
        }

        let input_channels = version.input_channels();
        let policy_outputs = version.policy_outputs();

        // Shape checks ahead of the in-place transforms.
        for (idx, (w, b)) in conv_weights.iter().zip(&conv_biases).enumerate() {
            let in_ch = if idx == 0 { input_channels } else { channels };
            if b.len() != channels || w.len() != channels * in_ch * 9 {
                return Err(LoadError::Malformed("convolution tensor has a bad shape"));
            }
        }
        for (means, stddevs) in bn_means.iter().zip(&bn_stddevs) {
            if means.len() != channels || stddevs.len() != channels {
                return Err(LoadError::Malformed("batch-norm vector has a bad shape"));
            }
        }
        if conv_pol_w.len() != conv_pol_b.len() * channels
            || conv_val_w.len() != conv_val_b.len() * channels
        {
            return Err(LoadError::Malformed("head convolution has a bad shape"));
        }
        if ip_pol_w.len() != policy_outputs * conv_pol_b.len() * 64
            || ip_pol_b.len() != policy_outputs
        {
            return Err(LoadError::Malformed("policy head has a bad shape"));
        }
        let value_channels = ip1_val_b.len();
        if ip1_val_w.len() != value_channels * conv_val_b.len() * 64
            || ip2_val_w.len() != value_channels
        {
            return Err(LoadError::Malformed("value head has a bad shape"));
        }
        let ip2_val_b = *ip2_val_b_line
            .first()
            .ok_or(LoadError::Malformed("missing value-head output bias"))?;

        // Winograd pre-transform, then fold conv biases into the bn means.
        let mut conv_layers = Vec::with_capacity(plain_conv_layers);
        for (idx, weights) in conv_weights.into_iter().enumerate() {
            let in_ch = if idx == 0 { input_channels } else { channels };
            let filter_u = transform_filter(&weights, channels, in_ch);
            let mut means = std::mem::take(&mut bn_means[idx]);
            for (m, b) in means.iter_mut().zip(&conv_biases[idx]) {
                *m -= b;
            }
            conv_layers.push(ConvLayer {
                filter_u,
                bn_means: means,
                bn_stddevs: std::mem::take(&mut bn_stddevs[idx]),
            });
        }

        for (m, b) in bn_pol_mean.iter_mut().zip(&conv_pol_b) {
            *m -= b;
        }
        for (m, b) in bn_val_mean.iter_mut().zip(&conv_val_b) {
            *m -= b;
        }

        Ok(Weights {
            version,
            channels,
            blocks,
            conv_layers,
            conv_pol: HeadConv {
                weights: conv_pol_w,
                bn_means: bn_pol_mean,
                bn_stddevs: bn_pol_stddev,
            },
            ip_pol_w,
            ip_pol_b,
            conv_val: HeadConv {
                weights: conv_val_w,
                bn_means: bn_val_mean,
                bn_stddevs: bn_val_stddev,
            },
            ip1_val_w,
            ip1_val_b,
            ip2_val_w,
            ip2_val_b,
        })
    }

    pub fn format_version(&self) -> FormatVersion {
        self.version
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn input_channels(&self) -> usize {
        self.version.input_channels()
    }

    pub fn hist_planes(&self) -> usize {
        self.version.hist_planes()
    }

    pub fn policy_outputs(&self) -> usize {
        self.version.policy_outputs()
    }

    /// Width of the value head's hidden layer.
    pub fn value_channels(&self) -> usize {
        self.ip1_val_b.len()
    }

    /// Policy-head planes as stored in the file.
    pub fn policy_planes(&self) -> usize {
        self.conv_pol.bn_means.len()
    }

    /// Value-head planes as stored in the file.
    pub fn value_planes(&self) -> usize {
        self.conv_val.bn_means.len()
    }
}
