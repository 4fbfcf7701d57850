use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MtgvError, Result};

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const API_BASE_ENV: &str = "MTGV_API_BASE_URL";

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// Coalescing windows for the two outbound message classes.
pub const CARD_LIST_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const VERSION_SELECTION_DEBOUNCE: Duration = Duration::from_millis(500);

pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
pub const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on how long inbound updates are ignored while the startup
/// fetch is outstanding.
pub const STARTUP_GUARD_TIMEOUT: Duration = Duration::from_secs(2);

pub const PACKAGE_ID_FILE: &str = "last_package_id";

/// Resolve the backend base URL from `MTGV_API_BASE_URL`, falling back to
/// [`DEFAULT_API_BASE`]. A trailing slash is stripped.
pub fn api_base_from_env() -> String {
    std::env::var(API_BASE_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// Derive the realtime endpoint for an API base URL.
///
/// `http://host:8000/api` becomes `ws://host:8000/api/ws` and `https` maps
/// to `wss`.
pub fn ws_url_for(api_base: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(api_base)
        .map_err(|e| MtgvError::InvalidArgument(format!("Invalid API base URL '{api_base}': {e}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(format!("{}/ws", api_base.trim_end_matches('/'))),
        other => {
            return Err(MtgvError::InvalidArgument(format!(
                "Unsupported URL scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| MtgvError::InvalidArgument(format!("Cannot derive ws URL from {api_base}")))?;
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{path}/ws"));
    Ok(url.to_string())
}

pub fn default_data_dir() -> PathBuf {
    if let Some(data) = dirs::data_local_dir() {
        data.join("mtgv-sdk")
    } else {
        PathBuf::from(".mtgv-sdk")
    }
}
