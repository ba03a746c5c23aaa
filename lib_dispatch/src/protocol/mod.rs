//! # Protocol Module
//!
//! Wire shapes exchanged with the processing service: the tagged duplex
//! channel messages and the REST submit/poll bodies.

#![forbid(unsafe_code)]

/// Tagged duplex channel messages.
pub mod messages;
/// REST submit/poll request and response bodies.
pub mod rest;

pub use messages::{result_content_id, InboundMessage, OutboundMessage};
pub use rest::{PollResponse, PollStatus, SubmitResponse};
