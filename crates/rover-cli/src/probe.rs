//! Navigator reachability check.
//!
//! The navigator only accepts frame uploads, so any HTTP answer (even a
//! `405 Method Not Allowed`) counts as "online".  Only transport failures
//! count as "offline".

use std::time::Duration;

/// Default probe deadline.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Issue a GET to `url` and return the HTTP status code it answered with.
pub fn probe(url: &str, timeout: Duration) -> Result<u16, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| format!("Navigator unreachable at {}: {}", url, e))?;
    Ok(response.status().as_u16())
}
