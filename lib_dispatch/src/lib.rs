//! # lib_dispatch
//!
//! Connection-resilient job dispatch for a remote image processing service.
//!
//! Jobs are submitted with a resolve-once completion and routed either over a
//! single shared duplex channel or, while the service is still cold, through
//! a submit-then-poll REST fallback. The channel is opened lazily behind a
//! cached health preflight, reconnects with capped exponential backoff, and
//! when it drops, every outstanding job fails at once with a clear message.
//!
//! ## Modules
//!
//! - **`core`**: the engine (`DispatchContext` is the entry point).
//! - **`protocol`**: channel and REST wire shapes.
//! - **`configs`**: `DispatchConfig` and, with `configs`, layered loading.
//! - **`utils`**: address normalization and content keys.
//! - **`retrieve`** (feature): HTTP and WebSocket transports.
//! - **`loggers`** (feature): fern logger setup.

#![forbid(unsafe_code)]

pub mod configs;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod protocol;
#[cfg(feature = "retrieve")]
pub mod retrieve;
pub mod utils;

pub use crate::configs::DispatchConfig;
pub use crate::core::completion::{Completion, JobHandle, JobOutcome, JobResult};
pub use crate::core::context::DispatchContext;
pub use crate::core::dispatcher::{Job, JobSpec};
pub use crate::core::status::{ConnectionState, StatusUpdate};
pub use crate::core::transport::{
    ChannelConnector, ChannelEvent, DuplexChannel, ProbeMethod, ResolvedAsset, ServiceApi,
};
pub use crate::error::{DispatchError, DispatchResult};
