//! # Dispatch Context
//!
//! The one object an application holds. It wires the caches, the router, the
//! connection manager, the task queue and the dispatcher together and exposes
//! the public operations.
//!
//! Constructing a context has no side effects: nothing touches the network
//! until the first job, connect request or asset lookup.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::configs::DispatchConfig;
use crate::core::completion::{Completion, JobOutcome};
use crate::core::connection_manager::ConnectionManager;
use crate::core::content_cache::ContentCache;
use crate::core::dispatcher::{JobDispatcher, JobSpec};
use crate::core::health_cache::HealthCache;
use crate::core::pending_table::ResultRouter;
use crate::core::rest_adapter::RestAdapter;
use crate::core::status::{ConnectionState, StatusUpdate};
use crate::core::task_queue::TaskQueue;
use crate::core::transport::{ChannelConnector, ResolvedAsset, ServiceApi};
use crate::error::{DispatchError, DispatchResult};
use crate::utils::content_key;

pub struct DispatchContext {
    api: Arc<dyn ServiceApi>,
    health: Arc<HealthCache>,
    asset_cache: ContentCache<ResolvedAsset>,
    router: Arc<ResultRouter>,
    conn: Arc<ConnectionManager>,
    queue: Arc<TaskQueue>,
    dispatcher: Arc<JobDispatcher>,
}

impl DispatchContext {
    pub fn new(config: DispatchConfig, api: Arc<dyn ServiceApi>, connector: Arc<dyn ChannelConnector>) -> Self {
        let config = Arc::new(config);
        let result_cache = Arc::new(ContentCache::new(config.result_cache_ttl(), config.result_cache_max));
        let asset_cache = ContentCache::new(config.asset_cache_ttl(), config.asset_cache_max);
        let health = Arc::new(HealthCache::new(Arc::clone(&api), &config));
        let router = Arc::new(ResultRouter::new(Arc::clone(&result_cache)));
        let conn = Arc::new(ConnectionManager::new(
            Arc::clone(&config),
            connector,
            Arc::clone(&health),
            Arc::clone(&router),
        ));
        let queue = TaskQueue::new(config.max_concurrency);
        let rest = RestAdapter::new(Arc::clone(&api), &config);
        let dispatcher = Arc::new(JobDispatcher::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&conn),
            Arc::clone(&router),
            rest,
            result_cache,
        ));

        Self {
            api,
            health,
            asset_cache,
            router,
            conn,
            queue,
            dispatcher,
        }
    }

    /// A context backed by the real HTTP and WebSocket transports.
    #[cfg(feature = "retrieve")]
    pub fn with_http(config: DispatchConfig) -> DispatchResult<Self> {
        use crate::retrieve::{HttpServiceApi, WsConnector};

        let api = HttpServiceApi::new(config.request_timeout())?;
        Ok(Self::new(config, Arc::new(api), Arc::new(WsConnector)))
    }

    /// Queues a job; the outcome arrives through `spec.completion`.
    pub fn submit(&self, spec: JobSpec) {
        self.dispatcher.submit(spec);
    }

    /// Convenience wrapper: builds a [`JobSpec`] from a payload and waits for it.
    ///
    /// `None` means the job's batch was cancelled.
    pub async fn run(&self, payload: Value) -> Option<JobOutcome> {
        let (completion, handle) = Completion::channel();
        self.submit(JobSpec::new(payload, completion));
        handle.outcome().await
    }

    pub fn begin_batch(&self) -> String {
        self.dispatcher.begin_batch()
    }

    pub fn current_batch(&self) -> Option<String> {
        self.dispatcher.current_batch()
    }

    pub fn cancel_batch(&self, batch_id: &str) -> usize {
        self.dispatcher.cancel_batch(batch_id)
    }

    pub async fn ensure_connected(&self) -> bool {
        self.conn.ensure_connected().await
    }

    /// Reachability of the configured address (cached, single-flight).
    pub async fn probe_health(&self) -> DispatchResult<bool> {
        let base = self.conn.resolve_base().ok_or(DispatchError::Unresolvable)?;
        Ok(self.health.probe(&base).await)
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.conn.subscribe_status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.conn.connection_state()
    }

    pub fn set_service_address(&self, raw: &str) {
        self.conn.set_service_address(raw);
    }

    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        self.queue.set_max_concurrency(max_concurrency);
    }

    /// Fetches a content address, serving repeats of the same content key from cache.
    pub async fn resolve_asset(&self, url: &str) -> DispatchResult<ResolvedAsset> {
        let key = content_key(url);
        if let Some(key) = &key {
            if let Some(asset) = self.asset_cache.get(key) {
                log::debug!("[asset] cache hit {}", key);
                return Ok(asset);
            }
        }
        let asset = self.api.fetch_asset(url).await?;
        if let Some(key) = key {
            self.asset_cache.put(key, asset.clone());
        }
        Ok(asset)
    }

    pub fn pending_jobs(&self) -> usize {
        self.router.len()
    }

    pub fn running_jobs(&self) -> usize {
        self.queue.running()
    }

    pub fn queued_jobs(&self) -> usize {
        self.queue.queued()
    }

    /// Highest number of jobs observed running at once.
    pub fn peak_running_jobs(&self) -> usize {
        self.queue.peak_running()
    }

    /// Whether a job has completed through the service yet (cold-start flag cleared).
    pub fn has_delivered(&self) -> bool {
        self.router.has_delivered()
    }

    pub fn sends_blocked(&self) -> bool {
        self.conn.sends_blocked()
    }

    pub fn open_attempts(&self) -> usize {
        self.conn.open_attempts()
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
