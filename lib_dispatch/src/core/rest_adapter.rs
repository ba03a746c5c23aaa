//! # REST Fallback
//!
//! Submit-then-poll path used while the service is cold. Polling runs at a
//! fixed interval under one absolute deadline, and stops early once nobody is
//! waiting for the job any more.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::configs::DispatchConfig;
use crate::core::transport::ServiceApi;
use crate::error::{DispatchError, DispatchResult};
use crate::protocol::PollStatus;

pub struct RestAdapter {
    api: Arc<dyn ServiceApi>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl RestAdapter {
    pub fn new(api: Arc<dyn ServiceApi>, config: &DispatchConfig) -> Self {
        Self {
            api,
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
        }
    }

    /// Submits `payload` and returns the service job id.
    pub async fn submit(&self, base: &str, payload: &Value) -> DispatchResult<String> {
        let id = self.api.submit_job(base, payload).await?;
        if id.is_empty() {
            return Err(DispatchError::Protocol("REST submit failed: no id".into()));
        }
        log::info!("[EV] rest.submit id={}", id);
        Ok(id)
    }

    /// Polls until the job is done, fails, or the deadline passes.
    ///
    /// Returns `Ok(None)` when `still_wanted` turns false (the job was cancelled
    /// or resolved elsewhere) before a terminal status arrived.
    pub async fn poll_until_done<F>(&self, base: &str, job_id: &str, still_wanted: F) -> DispatchResult<Option<Value>>
    where
        F: Fn() -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.poll_timeout;
        tokio::time::timeout_at(deadline, self.poll_loop(base, job_id, started, still_wanted))
            .await
            .map_err(|_| DispatchError::Timeout("rest-poll"))?
    }

    async fn poll_loop<F>(&self, base: &str, job_id: &str, started: Instant, still_wanted: F) -> DispatchResult<Option<Value>>
    where
        F: Fn() -> bool,
    {
        let mut polls = 0u32;
        loop {
            if !still_wanted() {
                log::debug!("[rest] stopped polling {}: no longer pending", job_id);
                return Ok(None);
            }
            polls += 1;
            match self.api.poll_job(base, job_id).await? {
                PollStatus::Done(result) => {
                    log::info!(
                        "[EV] rest.done id={} polls={} dt={}ms",
                        job_id,
                        polls,
                        started.elapsed().as_millis()
                    );
                    return Ok(Some(result));
                }
                PollStatus::Failed(message) => return Err(DispatchError::Service(message)),
                PollStatus::Pending => {}
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ProbeMethod, ResolvedAsset};
    use futures_util::future::{BoxFuture, FutureExt};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `pending` for the first `pending_polls` polls, then `final_status`.
    struct Scripted {
        pending_polls: usize,
        final_status: PollStatus,
        polls: AtomicUsize,
        submit_id: String,
    }

    impl ServiceApi for Scripted {
        fn probe_health<'a>(&'a self, _: &'a str, _: ProbeMethod, _: Duration) -> BoxFuture<'a, bool> {
            async { true }.boxed()
        }
        fn warm_up<'a>(&'a self, _: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
            async { Ok(()) }.boxed()
        }
        fn submit_job<'a>(&'a self, _: &'a str, _: &'a Value) -> BoxFuture<'a, DispatchResult<String>> {
            async move { Ok(self.submit_id.clone()) }.boxed()
        }
        fn poll_job<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, DispatchResult<PollStatus>> {
            async move {
                let n = self.polls.fetch_add(1, Ordering::SeqCst);
                if n < self.pending_polls {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(self.final_status.clone())
                }
            }
            .boxed()
        }
        fn fetch_asset<'a>(&'a self, _: &'a str) -> BoxFuture<'a, DispatchResult<ResolvedAsset>> {
            async { Err(DispatchError::Transport("unused".into())) }.boxed()
        }
    }

    fn adapter(pending_polls: usize, final_status: PollStatus) -> (RestAdapter, Arc<Scripted>) {
        let api = Arc::new(Scripted {
            pending_polls,
            final_status,
            polls: AtomicUsize::new(0),
            submit_id: "svc-1".into(),
        });
        (RestAdapter::new(Arc::clone(&api) as Arc<dyn ServiceApi>, &DispatchConfig::default()), api)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_at_interval_until_done() {
        let (rest, api) = adapter(2, PollStatus::Done(json!({"ok": true})));
        let started = Instant::now();

        assert_eq!(rest.submit("http://h", &json!({})).await.unwrap(), "svc-1");
        let result = rest.poll_until_done("http://h", "svc-1", || true).await.unwrap();
        assert_eq!(result, Some(json!({"ok": true})));
        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_is_terminal() {
        let (rest, _) = adapter(0, PollStatus::Failed("job_not_found".into()));
        let err = rest.poll_until_done("http://h", "svc-1", || true).await.unwrap_err();
        assert_eq!(err, DispatchError::Service("job_not_found".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let (rest, _) = adapter(usize::MAX, PollStatus::Pending);
        let started = Instant::now();
        let err = rest.poll_until_done("http://h", "svc-1", || true).await.unwrap_err();
        assert_eq!(err, DispatchError::Timeout("rest-poll"));
        assert!(started.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_no_longer_wanted() {
        let (rest, api) = adapter(usize::MAX, PollStatus::Pending);
        let result = rest.poll_until_done("http://h", "svc-1", || false).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    }
}
