//! # Configuration Modules
//!
//! The dispatch configuration struct is always available; file and
//! environment layering is gated behind the `configs` feature.

/// Dispatch tunables, defaults and layered loading.
pub mod config_dispatch;

pub use config_dispatch::DispatchConfig;

#[cfg(feature = "configs")]
pub use config_dispatch::{ConfigError, ENV_PREFIX};
