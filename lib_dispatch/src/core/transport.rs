//! # Transport Seams
//!
//! The dispatch core never talks to the network directly. It goes through two
//! object-safe traits, one for the request/response endpoints and one for the
//! duplex channel, so the same core runs against the real HTTP/WebSocket
//! clients (see `retrieve`) or against an in-process fake in tests.
//!
//! Methods return boxed futures to keep the traits usable as `Arc<dyn _>`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::DispatchResult;
use crate::protocol::PollStatus;

/// The two accepted health probe methods: a full `GET` and a lighter `HEAD` fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeMethod {
    Get,
    Head,
}

/// A binary payload fetched on behalf of the page, base64 encoded for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub mime_type: String,
    pub data_base64: String,
}

/// Request/response side of the processing service.
pub trait ServiceApi: Send + Sync {
    /// Probes `<base>/health`. Any failure, including the deadline, is `false`.
    fn probe_health<'a>(
        &'a self,
        base: &'a str,
        method: ProbeMethod,
        timeout: Duration,
    ) -> BoxFuture<'a, bool>;

    /// Fires the low-priority wake signal at `<base>/warmup`.
    fn warm_up<'a>(&'a self, base: &'a str) -> BoxFuture<'a, DispatchResult<()>>;

    /// Submits a job over REST and returns the service-assigned job id.
    fn submit_job<'a>(&'a self, base: &'a str, payload: &'a Value) -> BoxFuture<'a, DispatchResult<String>>;

    /// Reads the status of a REST-submitted job once.
    fn poll_job<'a>(&'a self, base: &'a str, job_id: &'a str) -> BoxFuture<'a, DispatchResult<PollStatus>>;

    /// Downloads an arbitrary content address.
    fn fetch_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DispatchResult<ResolvedAsset>>;
}

/// Events surfaced by an open duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One inbound text frame.
    Text(String),
    /// The channel closed or errored; carries a human-readable reason.
    Closed(String),
}

/// An open duplex channel.
///
/// Dropping `outbound` asks the transport to close the channel. `inbound`
/// yields frames until a `Closed` event (or until the transport goes away).
#[derive(Debug)]
pub struct DuplexChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens duplex channels.
pub trait ChannelConnector: Send + Sync {
    /// Resolves once the handshake has completed and the channel is usable.
    fn open<'a>(&'a self, ws_url: &'a str) -> BoxFuture<'a, DispatchResult<DuplexChannel>>;
}
