//! # Health Cache
//!
//! Memoizes the reachability of a service base address. Within the TTL the
//! cached answer is returned without any network call; outside it, concurrent
//! callers for the same base share a single probe.
//!
//! A probe tries the full `GET /health` first (preflight deadline) and falls
//! back to a `HEAD` (health deadline).
//!
//! The warm-up signal is tracked separately: it is fired in the background at
//! most once per warm-up TTL per base and its outcome is only logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::configs::DispatchConfig;
use crate::core::transport::{ProbeMethod, ServiceApi};
use crate::utils::lock;

/// Last known reachability of one base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthRecord {
    pub ok: bool,
    pub checked_at: Instant,
}

type ProbeFuture = Shared<BoxFuture<'static, bool>>;

pub struct HealthCache {
    api: Arc<dyn ServiceApi>,
    ttl: Duration,
    get_timeout: Duration,
    head_timeout: Duration,
    warmup_enabled: bool,
    warmup_ttl: Duration,
    records: Mutex<HashMap<String, HealthRecord>>,
    in_flight: Mutex<HashMap<String, ProbeFuture>>,
    warmed: Mutex<HashMap<String, Instant>>,
    probes: AtomicUsize,
}

impl HealthCache {
    pub fn new(api: Arc<dyn ServiceApi>, config: &DispatchConfig) -> Self {
        Self {
            api,
            ttl: config.health_ttl(),
            get_timeout: config.preflight_timeout(),
            head_timeout: config.health_timeout(),
            warmup_enabled: config.warmup_enabled,
            warmup_ttl: config.warmup_ttl(),
            records: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            warmed: Mutex::new(HashMap::new()),
            probes: AtomicUsize::new(0),
        }
    }

    /// Returns whether `base` is reachable, consulting the cache first.
    pub async fn probe(self: &Arc<Self>, base: &str) -> bool {
        if let Some(record) = self.fresh_record(base) {
            log::debug!("[health] cached {} for {}", record.ok, base);
            return record.ok;
        }

        let probe = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(base) {
                Some(probe) => probe.clone(),
                None => {
                    let this = Arc::clone(self);
                    let owned = base.to_string();
                    let probe = async move { this.run_probe(owned).await }.boxed().shared();
                    in_flight.insert(base.to_string(), probe.clone());
                    probe
                }
            }
        };
        probe.await
    }

    /// The cached record for `base`, if still within the TTL.
    pub fn fresh_record(&self, base: &str) -> Option<HealthRecord> {
        let records = lock(&self.records);
        records
            .get(base)
            .filter(|r| r.checked_at.elapsed() < self.ttl)
            .copied()
    }

    /// Number of probes that actually reached the transport.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Fires `<base>/warmup` in the background unless it was sent recently.
    pub fn warm_up(&self, base: &str) {
        if !self.warmup_enabled {
            return;
        }
        {
            let mut warmed = lock(&self.warmed);
            if warmed
                .get(base)
                .is_some_and(|at| at.elapsed() < self.warmup_ttl)
            {
                return;
            }
            warmed.insert(base.to_string(), Instant::now());
        }

        let api = Arc::clone(&self.api);
        let base = base.to_string();
        tokio::spawn(async move {
            match api.warm_up(&base).await {
                Ok(()) => log::debug!("[health] warmup sent to {}", base),
                Err(e) => log::debug!("[health] warmup ignored: {}", e),
            }
        });
    }

    async fn run_probe(&self, base: String) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let mut ok = false;
        for (method, deadline) in [
            (ProbeMethod::Get, self.get_timeout),
            (ProbeMethod::Head, self.head_timeout),
        ] {
            let attempt = self.api.probe_health(&base, method, deadline);
            ok = tokio::time::timeout(deadline, attempt)
                .await
                .unwrap_or(false);
            if ok {
                break;
            }
            log::debug!("[health] {:?} probe failed for {}", method, base);
        }

        log::info!(
            "[EV] health.probe base={} ok={} dt={}ms",
            base,
            ok,
            started.elapsed().as_millis()
        );
        lock(&self.records).insert(
            base.clone(),
            HealthRecord {
                ok,
                checked_at: Instant::now(),
            },
        );
        lock(&self.in_flight).remove(&base);
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::ResolvedAsset;
    use crate::error::{DispatchError, DispatchResult};
    use crate::protocol::PollStatus;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct ProbeOnly {
        get_ok: AtomicBool,
        head_ok: AtomicBool,
        hang: AtomicBool,
        gets: AtomicUsize,
        heads: AtomicUsize,
        warmups: AtomicUsize,
    }

    impl ServiceApi for ProbeOnly {
        fn probe_health<'a>(&'a self, _base: &'a str, method: ProbeMethod, _t: Duration) -> BoxFuture<'a, bool> {
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.hang.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                match method {
                    ProbeMethod::Get => {
                        self.gets.fetch_add(1, Ordering::SeqCst);
                        self.get_ok.load(Ordering::SeqCst)
                    }
                    ProbeMethod::Head => {
                        self.heads.fetch_add(1, Ordering::SeqCst);
                        self.head_ok.load(Ordering::SeqCst)
                    }
                }
            }
            .boxed()
        }

        fn warm_up<'a>(&'a self, _base: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
            self.warmups.fetch_add(1, Ordering::SeqCst);
            async { Err(DispatchError::Transport("not listening".into())) }.boxed()
        }

        fn submit_job<'a>(&'a self, _: &'a str, _: &'a Value) -> BoxFuture<'a, DispatchResult<String>> {
            async { Err(DispatchError::Transport("unused".into())) }.boxed()
        }

        fn poll_job<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, DispatchResult<PollStatus>> {
            async { Err(DispatchError::Transport("unused".into())) }.boxed()
        }

        fn fetch_asset<'a>(&'a self, _: &'a str) -> BoxFuture<'a, DispatchResult<ResolvedAsset>> {
            async { Err(DispatchError::Transport("unused".into())) }.boxed()
        }
    }

    fn cache(api: Arc<ProbeOnly>) -> Arc<HealthCache> {
        Arc::new(HealthCache::new(api, &DispatchConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_probes_share_one_request() {
        let api = Arc::new(ProbeOnly::default());
        api.get_ok.store(true, Ordering::SeqCst);
        let health = cache(Arc::clone(&api));

        let (a, b, c) = tokio::join!(
            health.probe("http://localhost:8080"),
            health.probe("http://localhost:8080"),
            health.probe("http://localhost:8080"),
        );
        assert!(a && b && c);
        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
        assert_eq!(health.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_within_ttl_then_reprobed() {
        let api = Arc::new(ProbeOnly::default());
        api.get_ok.store(true, Ordering::SeqCst);
        let health = cache(Arc::clone(&api));

        assert!(health.probe("http://h").await);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(health.probe("http://h").await);
        assert_eq!(api.gets.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(health.probe("http://h").await);
        assert_eq!(api.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn head_is_the_fallback() {
        let api = Arc::new(ProbeOnly::default());
        api.head_ok.store(true, Ordering::SeqCst);
        let health = cache(Arc::clone(&api));

        assert!(health.probe("http://h").await);
        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
        assert_eq!(api.heads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_as_unreachable() {
        let api = Arc::new(ProbeOnly::default());
        api.hang.store(true, Ordering::SeqCst);
        let health = cache(Arc::clone(&api));

        let started = Instant::now();
        assert!(!health.probe("http://h").await);
        // 10s GET deadline, then 5s HEAD deadline.
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(health.fresh_record("http://h").map(|r| r.ok), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_fires_once_per_ttl() {
        let api = Arc::new(ProbeOnly::default());
        let health = cache(Arc::clone(&api));

        health.warm_up("http://h");
        health.warm_up("http://h");
        tokio::task::yield_now().await;
        assert_eq!(api.warmups.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(601)).await;
        health.warm_up("http://h");
        tokio::task::yield_now().await;
        assert_eq!(api.warmups.load(Ordering::SeqCst), 2);
    }
}
