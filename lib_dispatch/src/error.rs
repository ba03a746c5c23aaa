//! # Dispatch Errors
//!
//! A single error type flows through every layer of the dispatch core. Its
//! `Display` text is what ends up in front of the user when a job fails, so
//! each message says what to do next rather than what went wrong internally.

use thiserror::Error;

/// Errors produced while dispatching a job or maintaining the duplex channel.
///
/// The type is `Clone` because one failure (e.g. a dropped channel) is fanned
/// out to every job that was waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The service failed its reachability check.
    #[error("Server is offline or waking up. Please try again in a moment.")]
    Offline,

    /// The duplex channel dropped while jobs were still outstanding.
    #[error("Connection lost before all images finished. Please run the menu again.")]
    ConnectionLost,

    /// Sends stay blocked after a channel loss until a new batch begins.
    #[error("Connection closed. Please run the menu again.")]
    SendsBlocked,

    /// No usable service address is configured.
    #[error("No service address configured. Please set the API URL.")]
    Unresolvable,

    /// The service processed the job and reported a failure.
    #[error("{0}")]
    Service(String),

    /// HTTP or channel I/O failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The message could not be handed to the open channel.
    #[error("Send failed: {0}")]
    Send(String),

    /// An operation exceeded its absolute deadline.
    #[error("{0}-timeout")]
    Timeout(&'static str),

    /// A response or inbound message did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DispatchError {
    /// Whether the caller may reasonably retry the same job later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::Service(_) | DispatchError::Unresolvable)
    }
}

/// Convenience alias used across the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;
