//! # Core Module
//!
//! The dispatch engine: routing jobs to the processing service over a duplex
//! channel or the REST fallback, and delivering each outcome exactly once.
//!
//! ## Contained Modules:
//!
//! - **`transport`**: The `ServiceApi` / `ChannelConnector` seams the engine talks through.
//! - **`completion`**: Resolve-once job completions and the caller-side `JobHandle`.
//! - **`status`**: Connection state and its subscriber broadcast.
//! - **`health_cache`**: TTL-memoized, single-flight reachability probes and warm-up.
//! - **`content_cache`**: TTL + size bounded cache keyed by content key.
//! - **`pending_table`**: Pending jobs and the result router.
//! - **`connection_manager`**: The single duplex channel, its retries and loss handling.
//! - **`rest_adapter`**: Submit-then-poll fallback.
//! - **`task_queue`**: Concurrency-limited FIFO job execution.
//! - **`dispatcher`**: Per-job path selection, retry budget and batches.
//! - **`context`**: The public facade wiring everything together.

#![forbid(unsafe_code)]

pub mod completion;
pub mod connection_manager;
pub mod content_cache;
pub mod context;
pub mod dispatcher;
pub mod health_cache;
pub mod pending_table;
pub mod rest_adapter;
pub mod status;
pub mod task_queue;
pub mod transport;
