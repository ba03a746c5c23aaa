//! Stable cache keys for recurring content.
//!
//! Image CDNs serve the same file from many hosts and with per-request query
//! strings. The part that does not change is the `<hash>/<file>` pair after a
//! `data` (or `data-saver`) path segment, so that pair is the key.

use url::Url;

/// Path segments that introduce a `<hash>/<file>` pair.
const DATA_SEGMENTS: [&str; 2] = ["data", "data-saver"];

/// Returns the stable key for a content address, or `None` when the address has
/// no recognizable structure (such content is never cached).
pub fn content_key(address: &str) -> Option<String> {
    let parsed = Url::parse(address.trim()).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();

    let pos = segments.iter().position(|s| DATA_SEGMENTS.contains(s))?;
    let hash = segments.get(pos + 1)?;
    let file = segments.get(pos + 2)?;
    Some(format!("{}/{}", hash, file))
}
