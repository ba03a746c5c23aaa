//! # Service Address Helpers
//!
//! The configured address is user-typed, so it arrives in many shapes
//! (`localhost:8080`, `http://0.0.0.0:8080/`, ...). Everything downstream works
//! on the canonical form produced by [`normalize_url`].

use url::Url;

/// Normalizes a raw service address into its canonical `scheme://host[:port][/path]` form.
///
/// - trims whitespace and prepends `http://` when no scheme is present
/// - strips trailing slashes
/// - rewrites `0.0.0.0`, `127.0.0.1` and `[::1]` to `localhost`
///
/// Returns `None` when the address is empty or cannot be parsed.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let mut parsed = Url::parse(with_scheme.trim_end_matches('/')).ok()?;
    let loopback = matches!(
        parsed.host_str(),
        Some("0.0.0.0") | Some("127.0.0.1") | Some("[::1]")
    );
    if loopback {
        parsed.set_host(Some("localhost")).ok()?;
    }

    let out = parsed.to_string();
    Some(out.trim_end_matches('/').to_string())
}

/// Derives the duplex channel address from an HTTP base (`http` -> `ws`, `/ws` suffix).
pub fn to_ws(http_base: &str) -> Option<String> {
    let base = normalize_url(http_base)?;
    let rest = base
        .strip_prefix("https")
        .map(|r| format!("wss{}", r))
        .or_else(|| base.strip_prefix("http").map(|r| format!("ws{}", r)))?;
    Some(format!("{}/ws", rest))
}

/// Joins an endpoint path onto an already normalized base.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
