//! # Job Dispatcher
//!
//! Turns a submitted [`JobSpec`] into exactly one completion.
//!
//! Each job runs as one task on the [`TaskQueue`]:
//!
//! - jobs of a cancelled batch are dropped silently, whether still queued or
//!   cancelled while waiting on the service;
//! - while sends are blocked after a channel loss, jobs fail immediately;
//! - a result-cache hit completes the job without contacting the service;
//! - until the first job has been delivered (and unless disabled by
//!   `cold_start_rest`) the job takes the REST path (preflight, submit, poll)
//!   while the channel warms up in the background;
//! - afterwards it goes over the duplex channel, retrying connection and send
//!   failures a bounded number of times before failing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::configs::DispatchConfig;
use crate::core::completion::{Completion, JobResult};
use crate::core::connection_manager::ConnectionManager;
use crate::core::content_cache::ContentCache;
use crate::core::pending_table::{PendingEntry, Registration, ResultRouter};
use crate::core::rest_adapter::RestAdapter;
use crate::core::task_queue::TaskQueue;
use crate::error::DispatchError;
use crate::protocol::{result_content_id, OutboundMessage};
use crate::utils::{content_key, lock};

/// A caller's request to process one payload.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub payload: Value,
    pub completion: Completion,
    /// Application-level id (also used as the result routing fallback).
    pub content_id: Option<String>,
    /// Batch the job belongs to; defaults to the batch current at submission.
    pub batch_id: Option<String>,
    /// Content address the job processes; enables the result cache.
    pub source_url: Option<String>,
}

impl JobSpec {
    /// Builds a spec, picking up `src` and `metadata.image_id` from the payload when present.
    pub fn new(payload: Value, completion: Completion) -> Self {
        let source_url = payload
            .get("src")
            .and_then(Value::as_str)
            .map(str::to_string);
        let content_id = result_content_id(&payload).map(str::to_string);
        Self {
            payload,
            completion,
            content_id,
            batch_id: None,
            source_url,
        }
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_source_url(mut self, source_url: impl Into<String>) -> Self {
        self.source_url = Some(source_url.into());
        self
    }
}

/// A job as sent over the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub payload: Value,
    pub submitted_at: Instant,
}

impl Job {
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            submitted_at: Instant::now(),
        }
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage::Job {
            id: self.id.clone(),
            payload: self.payload.clone(),
        }
    }
}

pub struct JobDispatcher {
    queue: Arc<TaskQueue>,
    conn: Arc<ConnectionManager>,
    router: Arc<ResultRouter>,
    rest: RestAdapter,
    result_cache: Arc<ContentCache<Value>>,
    cold_start_rest: bool,
    job_retries: u32,
    retry_gap: Duration,
    current_batch: Mutex<Option<String>>,
}

impl JobDispatcher {
    pub fn new(
        config: &DispatchConfig,
        queue: Arc<TaskQueue>,
        conn: Arc<ConnectionManager>,
        router: Arc<ResultRouter>,
        rest: RestAdapter,
        result_cache: Arc<ContentCache<Value>>,
    ) -> Self {
        Self {
            queue,
            conn,
            router,
            rest,
            result_cache,
            cold_start_rest: config.cold_start_rest,
            job_retries: config.job_retries,
            retry_gap: config.job_retry_gap(),
            current_batch: Mutex::new(None),
        }
    }

    /// Queues a job. The outcome arrives through its completion.
    pub fn submit(self: &Arc<Self>, mut spec: JobSpec) {
        if spec.batch_id.is_none() {
            spec.batch_id = lock(&self.current_batch).clone();
        }
        log::info!(
            "[EV] job.enqueue content={} batch={}",
            spec.content_id.as_deref().unwrap_or("-"),
            spec.batch_id.as_deref().unwrap_or("-")
        );
        let this = Arc::clone(self);
        self.queue.add_task(move || async move { this.process(spec).await });
    }

    /// Starts a new batch and lifts the post-loss send block.
    pub fn begin_batch(&self) -> String {
        let batch_id = Uuid::new_v4().to_string();
        *lock(&self.current_batch) = Some(batch_id.clone());
        self.conn.unblock_sends();
        log::info!("[EV] batch.begin id={}", batch_id);
        batch_id
    }

    pub fn current_batch(&self) -> Option<String> {
        lock(&self.current_batch).clone()
    }

    /// Drops every pending and queued job of `batch_id` without invoking completions.
    pub fn cancel_batch(&self, batch_id: &str) -> usize {
        self.router.cancel_batch(batch_id)
    }

    async fn process(self: Arc<Self>, spec: JobSpec) {
        if self.is_cancelled(&spec) {
            spec.completion.discard();
            return;
        }
        if self.conn.sends_blocked() {
            log::warn!("[EV] job.blocked content={}", spec.content_id.as_deref().unwrap_or("-"));
            spec.completion.resolve(Err(DispatchError::SendsBlocked));
            return;
        }

        let cache_key = spec.source_url.as_deref().and_then(content_key);
        if let Some(key) = &cache_key {
            if let Some(result) = self.result_cache.get(key) {
                log::info!("[EV] job.cache_hit key={}", key);
                spec.completion.resolve(Ok(JobResult {
                    job_id: Uuid::new_v4().to_string(),
                    content_id: spec.content_id.clone(),
                    result,
                    from_cache: true,
                }));
                return;
            }
        }

        if self.router.has_delivered() || !self.cold_start_rest {
            self.process_via_channel(spec, cache_key).await;
        } else {
            self.process_via_rest(spec, cache_key).await;
        }
    }

    async fn process_via_rest(self: &Arc<Self>, spec: JobSpec, cache_key: Option<String>) {
        let Some(base) = self.conn.resolve_base() else {
            spec.completion.resolve(Err(DispatchError::Unresolvable));
            return;
        };
        let healthy = self.conn.preflight(&base).await;
        if self.is_cancelled(&spec) {
            spec.completion.discard();
            return;
        }
        if !healthy {
            log::warn!("[EV] rest.preflight.fail base={}", base);
            spec.completion.resolve(Err(DispatchError::Offline));
            return;
        }

        let conn = Arc::clone(&self.conn);
        tokio::spawn(async move {
            conn.ensure_connected().await;
        });

        let submitted = self.rest.submit(&base, &spec.payload).await;
        if self.is_cancelled(&spec) {
            spec.completion.discard();
            return;
        }
        let job_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                log::warn!("[EV] rest.submit.fail error={}", e);
                spec.completion.resolve(Err(e));
                return;
            }
        };

        let entry = PendingEntry::new(job_id.clone(), spec.completion.clone())
            .with_content_id(spec.content_id)
            .with_batch_id(spec.batch_id)
            .with_cache_key(cache_key);
        if !self.admit(entry, &spec.completion) {
            return;
        }

        // A batch cancelled while polling removes the entry, which stops the loop.
        let router = Arc::clone(&self.router);
        let polled = self
            .rest
            .poll_until_done(&base, &job_id, || router.contains(&job_id))
            .await;
        match polled {
            Ok(Some(result)) => {
                self.router.resolve_success(&job_id, result);
            }
            Ok(None) => {}
            Err(e) => {
                self.router.resolve_error(&job_id, e);
            }
        }
    }

    async fn process_via_channel(self: &Arc<Self>, spec: JobSpec, cache_key: Option<String>) {
        let JobSpec {
            payload,
            completion,
            content_id,
            batch_id,
            ..
        } = spec;

        for attempt in 0..=self.job_retries {
            let last = attempt == self.job_retries;

            let connected = self.conn.is_connected() || self.conn.ensure_connected().await;
            if batch_id.as_deref().is_some_and(|b| self.router.is_cancelled(b)) {
                completion.discard();
                return;
            }
            if !connected {
                if last {
                    completion.resolve(Err(DispatchError::Offline));
                    return;
                }
                log::warn!("[EV] job.retry reason=connect attempt={}", attempt + 1);
                tokio::time::sleep(self.retry_gap).await;
                continue;
            }

            let job = Job::new(payload.clone());
            let entry = PendingEntry::new(job.id.clone(), completion.clone())
                .with_content_id(content_id.clone())
                .with_batch_id(batch_id.clone())
                .with_cache_key(cache_key.clone());
            if !self.admit(entry, &completion) {
                return;
            }

            match self.conn.send(&job.to_message()) {
                Ok(()) => {
                    log::info!("[EV] job.send id={} attempt={}", job.id, attempt + 1);
                    return;
                }
                Err(e) => {
                    self.router.take(&job.id);
                    if last {
                        log::error!("[EV] job.send.fail id={} error={}", job.id, e);
                        completion.resolve(Err(e));
                        return;
                    }
                    log::warn!("[EV] job.retry reason=send attempt={} error={}", attempt + 1, e);
                    tokio::time::sleep(self.retry_gap).await;
                }
            }
        }
    }

    /// Registers `entry`. On rejection the completion is settled here: a
    /// duplicate id fails the job, a cancelled batch drops it silently.
    fn admit(&self, entry: PendingEntry, completion: &Completion) -> bool {
        let job_id = entry.job_id.clone();
        match self.router.register(entry) {
            Registration::Registered => true,
            Registration::Duplicate => {
                completion.resolve(Err(DispatchError::Protocol(format!("duplicate job id {}", job_id))));
                false
            }
            Registration::Cancelled => {
                completion.discard();
                false
            }
        }
    }

    fn is_cancelled(&self, spec: &JobSpec) -> bool {
        spec.batch_id
            .as_deref()
            .is_some_and(|b| self.router.is_cancelled(b))
    }
}
