//! Small, deterministic helpers shared across the client.
//!
//! IMPORTANT:
//! - No protocol or connection-lifecycle logic lives here.
//! - This module must remain lightweight and side-effect free (aside
//!   from `env_or`, which reads the process environment).

/// Reads an environment variable, returning `None` when unset or empty.
///
/// Used for the base-URL and credential overrides described in the
/// external-interfaces section: a feed-specific env var wins over a
/// hardcoded default when present.
pub fn env_or(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Normalizes a base URL's scheme to `ws`/`wss`.
///
/// `http`/`ws` map to `ws`; `https`/`wss` map to `wss`. Any other scheme
/// is left untouched (the caller will get a connection error from the
/// transport rather than a silently wrong URL).
pub fn normalize_ws_scheme(mut url: url::Url) -> url::Url {
    let new_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => other,
    };
    // `Url::set_scheme` rejects some transitions (e.g. switching to a
    // "special" scheme); ws/wss are both special to the `url` crate so
    // this always succeeds for the schemes we care about.
    let _ = url.set_scheme(new_scheme);
    url
}

/// Linear backoff delay for the Nth failed attempt (0-indexed count of
/// prior failures in a row): the first attempt has no delay, then it
/// grows linearly with `reconnect_delay`.
pub fn backoff_delay(failed_attempts_in_a_row: u32, reconnect_delay: std::time::Duration) -> std::time::Duration {
    reconnect_delay.saturating_mul(failed_attempts_in_a_row)
}

/// Delay before auth retry attempt `i` (0-indexed, i=0 never sleeps).
pub fn auth_retry_delay(i: u32, multiplier: u32) -> std::time::Duration {
    if i == 0 {
        return std::time::Duration::ZERO;
    }
    let capped = i.min(10);
    std::time::Duration::from_millis(500 * multiplier as u64 * capped as u64)
}
