//! cz-net: the forward-only network evaluator.
//!
//! A residual tower over an 8x8 board, evaluated with F(2x2, 3x3) Winograd
//! convolutions on top of a batched GEMM, plus policy and value heads.
//! Weights come from a text file, optionally gzip-compressed.

pub mod backend;
pub mod forward;
pub mod kernels;
pub mod loader;
#[cfg(test)]
pub(crate) mod testutil;
pub mod winograd;

pub use backend::{Backend, BackendError, SelfChecked};
pub use forward::{CpuBackend, Network};
pub use loader::{LoadError, Weights};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
