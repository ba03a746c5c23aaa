//! # Connection Manager
//!
//! Owns the single duplex channel to the processing service.
//!
//! `ensure_connected` is the only way a channel gets opened:
//!
//! 1. Resolve the configured address. No usable address means `Idle`.
//! 2. Preflight the base through the [`HealthCache`]. Unreachable means `Offline`.
//! 3. Reuse an open channel to the same base.
//! 4. Otherwise join the in-flight attempt, or start one. Concurrent callers
//!    never open a second channel.
//! 5. Each attempt closes any stale channel and opens a new one under the open
//!    deadline. Failures back off exponentially (capped, with random jitter)
//!    until the retry budget is spent, which leaves the state `Idle`.
//!
//! Every installed channel gets a generation number. The reader task only acts
//! on the end of its own generation, so a replaced channel's late close event
//! cannot tear down its successor. When the live channel ends, sends are
//! blocked until the next batch and every pending job is failed at once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::configs::DispatchConfig;
use crate::core::health_cache::HealthCache;
use crate::core::pending_table::ResultRouter;
use crate::core::status::{ConnectionState, StatusBroadcaster, StatusUpdate};
use crate::core::transport::{ChannelConnector, ChannelEvent, DuplexChannel};
use crate::error::{DispatchError, DispatchResult};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::utils::{lock, normalize_url, to_ws, truncate};

type ConnectAttempt = Shared<BoxFuture<'static, bool>>;

struct LiveChannel {
    base: String,
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Link {
    channel: Option<LiveChannel>,
    generation: u64,
}

pub struct ConnectionManager {
    config: Arc<DispatchConfig>,
    address: Mutex<String>,
    connector: Arc<dyn ChannelConnector>,
    health: Arc<HealthCache>,
    router: Arc<ResultRouter>,
    status: StatusBroadcaster,
    link: Mutex<Link>,
    attempt: Mutex<Option<ConnectAttempt>>,
    sends_blocked: AtomicBool,
    open_attempts: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<DispatchConfig>,
        connector: Arc<dyn ChannelConnector>,
        health: Arc<HealthCache>,
        router: Arc<ResultRouter>,
    ) -> Self {
        let address = config.service_address.clone();
        Self {
            config,
            address: Mutex::new(address),
            connector,
            health,
            router,
            status: StatusBroadcaster::new(),
            link: Mutex::new(Link::default()),
            attempt: Mutex::new(None),
            sends_blocked: AtomicBool::new(false),
            open_attempts: AtomicUsize::new(0),
        }
    }

    /// Replaces the configured service address. Takes effect on the next connect.
    pub fn set_service_address(&self, raw: &str) {
        log::info!("[ws] service address set to {}", raw);
        *lock(&self.address) = raw.to_string();
    }

    /// The normalized base URL of the configured address, if it is usable.
    pub fn resolve_base(&self) -> Option<String> {
        let raw = lock(&self.address).clone();
        normalize_url(&raw)
    }

    /// Preflights `base` and, when reachable, nudges the service awake.
    pub async fn preflight(&self, base: &str) -> bool {
        let ok = self.health.probe(base).await;
        if ok {
            self.health.warm_up(base);
        }
        ok
    }

    /// Makes sure an open channel exists. Returns `false` when none could be opened.
    pub async fn ensure_connected(self: &Arc<Self>) -> bool {
        let started = Instant::now();
        log::info!("[EV] ws.connect.begin");

        let Some(base) = self.resolve_base() else {
            log::warn!("[ws] no usable service address configured");
            self.status.set(ConnectionState::Idle);
            return false;
        };
        let Some(ws_url) = to_ws(&base) else {
            log::warn!("[ws] cannot derive channel address from {}", base);
            self.status.set(ConnectionState::Idle);
            return false;
        };

        if !self.preflight(&base).await {
            log::warn!("[EV] ws.preflight.fail base={}", base);
            self.status.set(ConnectionState::Offline);
            return false;
        }

        if self.is_open_to(&base) {
            return true;
        }

        let attempt = {
            let mut slot = lock(&self.attempt);
            match slot.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let this = Arc::clone(self);
                    let attempt = async move {
                        let ok = this.connect_with_retry(base, ws_url).await;
                        *lock(&this.attempt) = None;
                        ok
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        let ok = attempt.await;
        if ok {
            log::info!("[EV] ws.connect.ok dt={}ms", started.elapsed().as_millis());
        } else {
            log::error!("[EV] ws.connect.fail dt={}ms", started.elapsed().as_millis());
        }
        ok
    }

    async fn connect_with_retry(self: &Arc<Self>, base: String, ws_url: String) -> bool {
        let retries = self.config.ws_retries;
        let open_timeout = self.config.ws_open_timeout();

        for attempt in 0..=retries {
            self.close_channel();
            self.sends_blocked.store(false, Ordering::SeqCst);
            self.status.set(ConnectionState::Connecting);
            self.open_attempts.fetch_add(1, Ordering::SeqCst);

            let error = match tokio::time::timeout(open_timeout, self.connector.open(&ws_url)).await {
                Ok(Ok(channel)) => {
                    self.install(base, channel);
                    self.status.set(ConnectionState::Connected);
                    log::info!("[EV] ws.open url={} attempt={}", ws_url, attempt + 1);
                    return true;
                }
                Ok(Err(e)) => e,
                Err(_) => DispatchError::Timeout("ws-open"),
            };

            if attempt < retries {
                let delay = self.backoff_delay(attempt);
                log::warn!(
                    "[ws] open attempt {}/{} failed: {}. Retrying in {}ms...",
                    attempt + 1,
                    retries + 1,
                    error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            } else {
                log::error!("[ws] open failed after {} attempt(s): {}", retries + 1, error);
            }
        }

        self.status.set(ConnectionState::Idle);
        false
    }

    /// `min(cap, base * 2^attempt)` plus uniform jitter in `[0, jitter)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped = exp.min(self.config.backoff_cap_ms);
        let jitter = match self.config.backoff_jitter_ms {
            0 => 0,
            j => rand::rng().random_range(0..j),
        };
        Duration::from_millis(capped + jitter)
    }

    fn install(self: &Arc<Self>, base: String, channel: DuplexChannel) {
        let DuplexChannel { outbound, inbound } = channel;
        let mut link = lock(&self.link);
        link.generation += 1;
        let generation = link.generation;
        let reader = tokio::spawn(Arc::clone(self).read_loop(inbound, generation));
        link.channel = Some(LiveChannel {
            base,
            generation,
            outbound,
            reader,
        });
    }

    async fn read_loop(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<ChannelEvent>, generation: u64) {
        while let Some(event) = inbound.recv().await {
            match event {
                ChannelEvent::Text(frame) => self.handle_frame(&frame),
                ChannelEvent::Closed(reason) => {
                    self.on_channel_ended(generation, &reason);
                    return;
                }
            }
        }
        self.on_channel_ended(generation, "inbound stream ended");
    }

    fn handle_frame(&self, frame: &str) {
        match InboundMessage::parse(frame) {
            Ok(InboundMessage::Ack { id }) => {
                log::debug!("[ws] ack {}", id.as_deref().unwrap_or("(accept)"));
            }
            Ok(InboundMessage::Result { id, result }) => {
                self.router.resolve_success(&id, result);
            }
            Ok(InboundMessage::Error { id, error }) => {
                let message = error.unwrap_or_else(|| "Unknown error".to_string());
                self.router.resolve_error(&id, DispatchError::Service(message));
            }
            Err(e) => {
                log::warn!("[ws] dropped inbound frame ({}): {}", e, truncate(frame, 500));
            }
        }
    }

    fn on_channel_ended(&self, generation: u64, reason: &str) {
        {
            let mut link = lock(&self.link);
            match &link.channel {
                Some(live) if live.generation == generation => link.channel = None,
                _ => {
                    log::debug!("[ws] stale channel generation {} ended: {}", generation, reason);
                    return;
                }
            }
        }
        log::warn!("[EV] ws.end reason={}", reason);
        self.sends_blocked.store(true, Ordering::SeqCst);
        self.router.fail_all_pending(DispatchError::ConnectionLost);
        self.status.set(ConnectionState::Idle);
    }

    // Results for jobs sent on a replaced channel can never arrive on its
    // successor, so anything still pending is failed here.
    fn close_channel(&self) {
        let previous = lock(&self.link).channel.take();
        if let Some(live) = previous {
            log::debug!("[ws] closing channel generation {}", live.generation);
            live.reader.abort();
            self.router.fail_all_pending(DispatchError::ConnectionLost);
        }
    }

    fn is_open_to(&self, base: &str) -> bool {
        let link = lock(&self.link);
        link.channel
            .as_ref()
            .is_some_and(|live| live.base == base && !live.outbound.is_closed())
    }

    /// Writes one message to the open channel.
    pub fn send(&self, message: &OutboundMessage) -> DispatchResult<()> {
        let frame = message.to_frame()?;
        let link = lock(&self.link);
        let live = link
            .channel
            .as_ref()
            .ok_or_else(|| DispatchError::Send("channel not open".into()))?;
        live.outbound
            .send(frame)
            .map_err(|_| DispatchError::Send("channel closed".into()))
    }

    pub fn is_connected(&self) -> bool {
        let open = lock(&self.link)
            .channel
            .as_ref()
            .is_some_and(|live| !live.outbound.is_closed());
        open && self.status.current() == ConnectionState::Connected
    }

    pub fn sends_blocked(&self) -> bool {
        self.sends_blocked.load(Ordering::SeqCst)
    }

    pub fn unblock_sends(&self) {
        if self.sends_blocked.swap(false, Ordering::SeqCst) {
            log::info!("[ws] sends unblocked for new batch");
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// Number of channel open attempts made so far.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Closes the channel, failing whatever is still pending.
    pub fn shutdown(&self) {
        self.close_channel();
        self.status.set(ConnectionState::Idle);
    }
}
