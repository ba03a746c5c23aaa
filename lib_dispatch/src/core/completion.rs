//! # Job Completion Handles
//!
//! Every submitted job carries a [`Completion`]: a resolve-once slot holding
//! the caller's callback. Whoever resolves it first wins; every later attempt
//! (a duplicate server message, a late poll, a channel-loss sweep racing a
//! result) is a silent no-op that returns `false`.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DispatchError;
use crate::utils::lock;

/// Successful job output delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    /// Job id the result was matched on (service id for REST, client id for the channel).
    pub job_id: String,
    /// Application-level content id, when the job carried one.
    pub content_id: Option<String>,
    /// The result document as produced by the service.
    pub result: Value,
    /// `true` when served from the local result cache without contacting the service.
    pub from_cache: bool,
}

/// What a completion receives: the result, or a human-readable failure.
pub type JobOutcome = Result<JobResult, DispatchError>;

type Callback = Box<dyn FnOnce(JobOutcome) + Send + 'static>;

/// Resolve-once completion context for a single job.
///
/// Cloning shares the same slot, so any clone may resolve it and all clones
/// observe the resolution.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<Callback>>>,
}

impl Completion {
    /// Wraps a callback.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Creates a completion paired with a [`JobHandle`] future.
    pub fn channel() -> (Self, JobHandle) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::from_fn(move |outcome| {
            // The caller may have stopped listening; that is not our problem.
            let _ = tx.send(outcome);
        });
        (completion, JobHandle { rx })
    }

    /// Delivers the outcome. Returns `false` if the completion was already used.
    pub fn resolve(&self, outcome: JobOutcome) -> bool {
        let callback = lock(&self.slot).take();
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    /// Drops the callback without invoking it (batch cancellation).
    pub fn discard(&self) -> bool {
        lock(&self.slot).take().is_some()
    }

    /// Whether the completion has been resolved or discarded.
    pub fn is_spent(&self) -> bool {
        lock(&self.slot).is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// Caller-side future of a [`Completion::channel`] pair.
#[derive(Debug)]
pub struct JobHandle {
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Waits for the outcome. `None` means the job was cancelled and its
    /// completion discarded without being invoked.
    pub async fn outcome(self) -> Option<JobOutcome> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok(id: &str) -> JobOutcome {
        Ok(JobResult {
            job_id: id.into(),
            content_id: None,
            result: json!({}),
            from_cache: false,
        })
    }

    #[test]
    fn second_resolution_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let completion = Completion::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = completion.clone();

        assert!(completion.resolve(ok("a")));
        assert!(!clone.resolve(Err(DispatchError::Offline)));
        assert!(!completion.discard());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clone.is_spent());
    }

    #[tokio::test]
    async fn channel_delivers_outcome() {
        let (completion, handle) = Completion::channel();
        completion.resolve(Err(DispatchError::ConnectionLost));
        assert_eq!(handle.outcome().await, Some(Err(DispatchError::ConnectionLost)));
    }

    #[tokio::test]
    async fn discarded_completion_yields_none() {
        let (completion, handle) = Completion::channel();
        assert!(completion.discard());
        assert_eq!(handle.outcome().await, None);
    }
}
