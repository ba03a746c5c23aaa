//! # Dispatch Test Harness
//!
//! An in-process stand-in for the processing service. [`FakeService`]
//! implements both transport seams of `lib_dispatch`, so a real
//! [`DispatchContext`] can be driven end to end without a network:
//!
//! - the health probe, warm-up, REST submit/poll and asset endpoints;
//! - the duplex channel, which answers every `job` frame according to the
//!   configured [`ReplyMode`].
//!
//! Every behaviour is a knob and every call is counted, so tests can assert
//! both outcomes and how many times the service was bothered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use lib_dispatch::protocol::PollStatus;
use lib_dispatch::{
    ChannelConnector, ChannelEvent, DispatchConfig, DispatchContext, DispatchError, DispatchResult, DuplexChannel,
    ProbeMethod, ResolvedAsset, ServiceApi,
};

/// How the fake answers a job frame received over the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMode {
    /// One `result` frame.
    Result,
    /// The same `result` frame twice.
    Duplicate,
    /// One `error` frame with this message.
    Error(String),
    /// Nothing at all.
    Silent,
}

/// Tunable behaviour of the fake. Change it through [`FakeService::configure`].
#[derive(Debug, Clone)]
pub struct Knobs {
    pub healthy: bool,
    pub health_delay: Duration,
    /// Number of upcoming channel opens that fail.
    pub failing_opens: usize,
    pub open_delay: Duration,
    pub reply: ReplyMode,
    pub reply_delay: Duration,
    /// `pending` answers before a REST job reports `done`.
    pub rest_pending_polls: usize,
    /// When set, REST jobs end with `error` and this message instead of `done`.
    pub rest_failure: Option<String>,
    pub asset_mime: String,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            healthy: true,
            health_delay: Duration::ZERO,
            failing_opens: 0,
            open_delay: Duration::ZERO,
            reply: ReplyMode::Result,
            reply_delay: Duration::from_millis(50),
            rest_pending_polls: 0,
            rest_failure: None,
            asset_mime: "image/png".to_string(),
        }
    }
}

/// A job frame the fake received over the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SentJob {
    pub id: String,
    pub payload: Value,
}

struct RestJob {
    payload: Value,
    polls: usize,
}

#[derive(Default)]
pub struct FakeService {
    knobs: Mutex<Knobs>,
    health_probes: AtomicUsize,
    warmups: AtomicUsize,
    opens: AtomicUsize,
    rest_submits: AtomicUsize,
    rest_polls: AtomicUsize,
    asset_fetches: AtomicUsize,
    sent: Mutex<Vec<SentJob>>,
    rest_jobs: Mutex<HashMap<String, RestJob>>,
    // Sender side of the client's inbound stream for the most recent channel.
    channel: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The result document the fake produces for a payload: echoes it and carries
/// the payload's `metadata.image_id` back, as the real service does.
pub fn result_for(payload: &Value) -> Value {
    json!({
        "image": format!("translated:{}", payload.get("src").and_then(Value::as_str).unwrap_or("-")),
        "metadata": payload.get("metadata").cloned().unwrap_or_else(|| json!({})),
    })
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn configure(&self, change: impl FnOnce(&mut Knobs)) {
        change(&mut guard(&self.knobs));
    }

    fn knobs(&self) -> Knobs {
        guard(&self.knobs).clone()
    }

    pub fn health_probes(&self) -> usize {
        self.health_probes.load(Ordering::SeqCst)
    }

    pub fn warmups(&self) -> usize {
        self.warmups.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn rest_submits(&self) -> usize {
        self.rest_submits.load(Ordering::SeqCst)
    }

    pub fn rest_polls(&self) -> usize {
        self.rest_polls.load(Ordering::SeqCst)
    }

    pub fn asset_fetches(&self) -> usize {
        self.asset_fetches.load(Ordering::SeqCst)
    }

    /// Every job frame received over any channel, in arrival order.
    pub fn sent_jobs(&self) -> Vec<SentJob> {
        guard(&self.sent).clone()
    }

    /// Pushes a raw text frame to the client over the current channel.
    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        match guard(&self.channel).as_ref() {
            Some(tx) => tx.send(ChannelEvent::Text(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Closes the current channel from the service side.
    pub fn drop_channel(&self, reason: &str) -> bool {
        match guard(&self.channel).take() {
            Some(tx) => tx.send(ChannelEvent::Closed(reason.to_string())).is_ok(),
            None => false,
        }
    }

    fn serve_channel(
        self: Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        inbound: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let Ok(message) = serde_json::from_str::<Value>(&frame) else {
                    continue;
                };
                if message["type"] != "job" {
                    continue;
                }
                let job = SentJob {
                    id: message["id"].as_str().unwrap_or_default().to_string(),
                    payload: message["payload"].clone(),
                };
                guard(&self.sent).push(job.clone());
                let _ = inbound.send(ChannelEvent::Text(json!({"type": "ack", "id": job.id}).to_string()));

                let knobs = self.knobs();
                let replies = match &knobs.reply {
                    ReplyMode::Silent => continue,
                    ReplyMode::Result => {
                        vec![json!({"type": "result", "id": job.id, "result": result_for(&job.payload)})]
                    }
                    ReplyMode::Duplicate => {
                        let frame = json!({"type": "result", "id": job.id, "result": result_for(&job.payload)});
                        vec![frame.clone(), frame]
                    }
                    ReplyMode::Error(message) => vec![json!({"type": "error", "id": job.id, "error": message})],
                };

                let inbound = inbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(knobs.reply_delay).await;
                    for reply in replies {
                        let _ = inbound.send(ChannelEvent::Text(reply.to_string()));
                    }
                });
            }
        });
    }
}

impl ServiceApi for FakeService {
    fn probe_health<'a>(&'a self, _base: &'a str, _method: ProbeMethod, timeout: Duration) -> BoxFuture<'a, bool> {
        async move {
            self.health_probes.fetch_add(1, Ordering::SeqCst);
            let knobs = self.knobs();
            let answered = tokio::time::timeout(timeout, tokio::time::sleep(knobs.health_delay)).await;
            answered.is_ok() && knobs.healthy
        }
        .boxed()
    }

    fn warm_up<'a>(&'a self, _base: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
        async move {
            self.warmups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn submit_job<'a>(&'a self, _base: &'a str, payload: &'a Value) -> BoxFuture<'a, DispatchResult<String>> {
        async move {
            let n = self.rest_submits.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("rest-{}", n);
            guard(&self.rest_jobs).insert(
                id.clone(),
                RestJob {
                    payload: payload.clone(),
                    polls: 0,
                },
            );
            Ok(id)
        }
        .boxed()
    }

    fn poll_job<'a>(&'a self, _base: &'a str, job_id: &'a str) -> BoxFuture<'a, DispatchResult<PollStatus>> {
        async move {
            self.rest_polls.fetch_add(1, Ordering::SeqCst);
            let knobs = self.knobs();
            let mut jobs = guard(&self.rest_jobs);
            let Some(job) = jobs.get_mut(job_id) else {
                return Ok(PollStatus::Failed("job_not_found".to_string()));
            };
            job.polls += 1;
            if job.polls <= knobs.rest_pending_polls {
                return Ok(PollStatus::Pending);
            }
            Ok(match knobs.rest_failure {
                Some(message) => PollStatus::Failed(message),
                None => PollStatus::Done(result_for(&job.payload)),
            })
        }
        .boxed()
    }

    fn fetch_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DispatchResult<ResolvedAsset>> {
        async move {
            self.asset_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedAsset {
                mime_type: self.knobs().asset_mime,
                data_base64: format!("ZmFrZTo={}", url.len()),
            })
        }
        .boxed()
    }
}

/// Connector half of the fake. A separate type because `open` needs an
/// `Arc<FakeService>` to hand to the serving task.
pub struct FakeConnector(pub Arc<FakeService>);

impl ChannelConnector for FakeConnector {
    fn open<'a>(&'a self, _ws_url: &'a str) -> BoxFuture<'a, DispatchResult<DuplexChannel>> {
        async move {
            let service = Arc::clone(&self.0);
            service.opens.fetch_add(1, Ordering::SeqCst);
            let knobs = service.knobs();
            tokio::time::sleep(knobs.open_delay).await;

            let refused = {
                let mut live = guard(&service.knobs);
                if live.failing_opens > 0 {
                    live.failing_opens -= 1;
                    true
                } else {
                    false
                }
            };
            if refused {
                return Err(DispatchError::Transport("connection refused".to_string()));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            *guard(&service.channel) = Some(in_tx.clone());
            Arc::clone(&service).serve_channel(out_rx, in_tx);
            Ok(DuplexChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Configuration tuned for deterministic tests: no jitter, no warm-up noise.
pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        service_address: "http://fake.local:8080".to_string(),
        backoff_jitter_ms: 0,
        warmup_enabled: false,
        ..DispatchConfig::default()
    }
}

/// A real context wired to `service` for both transports.
pub fn context(service: &Arc<FakeService>, config: DispatchConfig) -> DispatchContext {
    let api: Arc<dyn ServiceApi> = service.clone();
    DispatchContext::new(config, api, Arc::new(FakeConnector(Arc::clone(service))))
}

/// Polls `condition` on the (possibly paused) tokio clock until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

static LOGGER: Once = Once::new();

/// Routes `log` output to stderr at the level named by `RUST_LOG` (default `warn`).
/// Safe to call from every test.
pub fn init_test_logging() {
    LOGGER.call_once(|| {
        let level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|v| v.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Warn);
        let _ = fern::Dispatch::new()
            .format(|out, message, record| out.finish(format_args!("[{}] {} {}", record.level(), record.target(), message)))
            .level(level)
            .chain(std::io::stderr())
            .apply();
    });
}
