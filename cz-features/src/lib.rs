//! cz-features: network input encoding and the policy-index mapping.

pub mod planes;
pub mod policy_map;
pub mod schema;

pub use planes::{encode, materialize, InputPlane};
pub use policy_map::PolicyMap;
pub use schema::{FormatVersion, BOARD_SQUARES, POLICY_PLANES, T_HISTORY, VALUE_CHANNELS, VALUE_PLANES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
