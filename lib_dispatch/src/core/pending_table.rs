//! # Pending Table & Result Router
//!
//! Tracks every job that has been sent but not yet answered and routes each
//! inbound outcome to exactly one completion.
//!
//! Lookup order for a result is the job id first, then the content id the
//! result carries in its metadata. A lookup that finds nothing (late duplicate,
//! cancelled batch, already failed by a channel loss) is logged and dropped.
//!
//! All table mutations happen under one lock with no suspension point inside;
//! completions are always invoked after the lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::time::Instant;

use crate::core::completion::{Completion, JobResult};
use crate::core::content_cache::ContentCache;
use crate::error::DispatchError;
use crate::protocol::result_content_id;
use crate::utils::{lock, truncate};

/// How many cancelled batch ids are remembered. Older ones are forgotten.
pub const MAX_CANCELLED_BATCHES: usize = 256;

/// One job awaiting its outcome.
#[derive(Debug)]
pub struct PendingEntry {
    pub job_id: String,
    pub content_id: Option<String>,
    pub batch_id: Option<String>,
    /// Result-cache key to write through on success.
    pub cache_key: Option<String>,
    pub completion: Completion,
    pub started_at: Instant,
}

impl PendingEntry {
    pub fn new(job_id: impl Into<String>, completion: Completion) -> Self {
        Self {
            job_id: job_id.into(),
            content_id: None,
            batch_id: None,
            cache_key: None,
            completion,
            started_at: Instant::now(),
        }
    }

    pub fn with_content_id(mut self, content_id: Option<String>) -> Self {
        self.content_id = content_id;
        self
    }

    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_cache_key(mut self, cache_key: Option<String>) -> Self {
        self.cache_key = cache_key;
        self
    }
}

/// Outcome of [`ResultRouter::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// The job id is already pending.
    Duplicate,
    /// The entry belongs to a cancelled batch.
    Cancelled,
}

#[derive(Debug, Default)]
struct Tables {
    by_job: HashMap<String, PendingEntry>,
    // content id -> job id of the most recent registration with that content id
    by_content: HashMap<String, String>,
    // most recently cancelled last
    cancelled_batches: VecDeque<String>,
}

impl Tables {
    fn is_cancelled(&self, batch_id: &str) -> bool {
        self.cancelled_batches.iter().any(|b| b == batch_id)
    }

    fn remember_cancelled(&mut self, batch_id: &str) {
        if self.is_cancelled(batch_id) {
            return;
        }
        self.cancelled_batches.push_back(batch_id.to_string());
        while self.cancelled_batches.len() > MAX_CANCELLED_BATCHES {
            self.cancelled_batches.pop_front();
        }
    }

    fn remove_job(&mut self, job_id: &str) -> Option<PendingEntry> {
        let entry = self.by_job.remove(job_id)?;
        if let Some(cid) = &entry.content_id {
            if self.by_content.get(cid).is_some_and(|j| j == job_id) {
                self.by_content.remove(cid);
            }
        }
        Some(entry)
    }

    fn remove_for_result(&mut self, job_id: &str, result: &Value) -> Option<PendingEntry> {
        if let Some(entry) = self.remove_job(job_id) {
            return Some(entry);
        }
        let cid = result_content_id(result)?;
        let fallback = self.by_content.get(cid)?.clone();
        self.remove_job(&fallback)
    }
}

pub struct ResultRouter {
    tables: Mutex<Tables>,
    result_cache: Arc<ContentCache<Value>>,
    delivered: AtomicBool,
}

impl ResultRouter {
    pub fn new(result_cache: Arc<ContentCache<Value>>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            result_cache,
            delivered: AtomicBool::new(false),
        }
    }

    /// Registers a job. A duplicate id or a cancelled batch leaves the table
    /// untouched and the entry's completion uninvoked.
    pub fn register(&self, entry: PendingEntry) -> Registration {
        let mut tables = lock(&self.tables);
        if entry.batch_id.as_deref().is_some_and(|b| tables.is_cancelled(b)) {
            log::debug!("[router] job {} of a cancelled batch not registered", entry.job_id);
            return Registration::Cancelled;
        }
        if tables.by_job.contains_key(&entry.job_id) {
            log::warn!("[router] duplicate job id {} rejected", entry.job_id);
            return Registration::Duplicate;
        }
        if let Some(cid) = &entry.content_id {
            tables.by_content.insert(cid.clone(), entry.job_id.clone());
        }
        tables.by_job.insert(entry.job_id.clone(), entry);
        Registration::Registered
    }

    /// Removes a job without invoking its completion (a failed send about to be retried).
    pub fn take(&self, job_id: &str) -> Option<PendingEntry> {
        lock(&self.tables).remove_job(job_id)
    }

    /// Routes a successful result. Returns whether a pending job received it.
    pub fn resolve_success(&self, job_id: &str, result: Value) -> bool {
        let entry = lock(&self.tables).remove_for_result(job_id, &result);
        let Some(entry) = entry else {
            log::debug!(
                "[router] result for unknown job {} dropped: {}",
                job_id,
                truncate(&result.to_string(), 500)
            );
            return false;
        };

        if let Some(key) = &entry.cache_key {
            self.result_cache.put(key.clone(), result.clone());
        }
        self.delivered.store(true, Ordering::SeqCst);

        log::info!(
            "[EV] job.done id={} dt={}ms",
            entry.job_id,
            entry.started_at.elapsed().as_millis()
        );
        entry.completion.resolve(Ok(JobResult {
            job_id: entry.job_id.clone(),
            content_id: entry.content_id.clone(),
            result,
            from_cache: false,
        }))
    }

    /// Routes a failure for one job.
    pub fn resolve_error(&self, job_id: &str, error: DispatchError) -> bool {
        let entry = lock(&self.tables).remove_job(job_id);
        match entry {
            Some(entry) => {
                log::warn!("[EV] job.error id={} error={}", job_id, error);
                entry.completion.resolve(Err(error))
            }
            None => {
                log::debug!("[router] error for unknown job {} dropped", job_id);
                false
            }
        }
    }

    /// Fails every pending job with `error` and empties both indexes.
    pub fn fail_all_pending(&self, error: DispatchError) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut tables = lock(&self.tables);
            tables.by_content.clear();
            tables.by_job.drain().map(|(_, e)| e).collect()
        };
        if !drained.is_empty() {
            log::warn!("[router] failing {} pending job(s): {}", drained.len(), error);
        }
        drained
            .into_iter()
            .filter(|e| e.completion.resolve(Err(error.clone())))
            .count()
    }

    /// Drops every pending job of `batch_id` without invoking its completion,
    /// and remembers the batch so queued and in-flight jobs of it are skipped too.
    /// Only the last [`MAX_CANCELLED_BATCHES`] cancellations are remembered.
    pub fn cancel_batch(&self, batch_id: &str) -> usize {
        let removed: Vec<PendingEntry> = {
            let mut tables = lock(&self.tables);
            tables.remember_cancelled(batch_id);
            let ids: Vec<String> = tables
                .by_job
                .values()
                .filter(|e| e.batch_id.as_deref() == Some(batch_id))
                .map(|e| e.job_id.clone())
                .collect();
            ids.iter().filter_map(|id| tables.remove_job(id)).collect()
        };
        for entry in &removed {
            entry.completion.discard();
        }
        log::info!("[router] batch {} cancelled, {} pending dropped", batch_id, removed.len());
        removed.len()
    }

    pub fn is_cancelled(&self, batch_id: &str) -> bool {
        lock(&self.tables).is_cancelled(batch_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        lock(&self.tables).by_job.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.tables).by_job.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any job has ever completed successfully through this router.
    pub fn has_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }
}
