//! # Retrieve Module
//!
//! Real network transports behind the core's transport traits.

/// Generic JSON API client with retrying and send-once stacks.
pub mod ky_http;
/// `ServiceApi` over HTTP.
pub mod service_api;
/// `ChannelConnector` over WebSocket.
pub mod ws_channel;

pub use service_api::HttpServiceApi;
pub use ws_channel::WsConnector;
