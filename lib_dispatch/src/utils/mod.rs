//! # Utilities Module
//!
//! Small, dependency-light helpers shared by the dispatch core and the
//! transports.
//!
//! ## Contained Modules:
//!
//! - **`url`**: Normalization of the configured service address and derivation
//!   of the duplex-channel and endpoint URLs from it.
//! - **`content_key`**: Derivation of a stable cache key from a content
//!   address, so the same image served from different mirrors shares one
//!   cache entry.

#![forbid(unsafe_code)]

/// Service address normalization and endpoint URL building.
pub mod url;
/// Stable cache keys derived from content addresses.
pub mod content_key;

pub use self::content_key::content_key;
pub use self::url::{endpoint, normalize_url, to_ws};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate is a short, synchronous table update,
/// so the protected data is consistent even after a poisoning panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Truncates long strings for log output.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}
