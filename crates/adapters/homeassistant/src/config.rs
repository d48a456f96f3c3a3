//! Home Assistant connection configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use automoli_domain::error::ValidationError;

/// Configuration for the hub connection.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL of the hub, e.g. `http://homeassistant.local:8123`.
    pub url: String,
    /// Long-lived access token.
    pub token: String,
    /// Upper bound for dial plus handshake, in seconds.
    pub connect_timeout_secs: u64,
    /// Reconnect when no frame arrived for this long, in seconds.
    pub watchdog_max_age_secs: u64,
    /// How often the watchdog checks, in seconds.
    pub watchdog_check_every_secs: u64,
    /// Maximum reconnect backoff, in seconds.
    pub backoff_cap_secs: u64,
    /// Capacity of the channel forwarding events to the engine.
    pub event_buffer: usize,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            connect_timeout_secs: 5,
            watchdog_max_age_secs: 17,
            watchdog_check_every_secs: 7,
            backoff_cap_secs: 8,
            event_buffer: 256,
        }
    }
}

impl fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("watchdog_max_age_secs", &self.watchdog_max_age_secs)
            .field("watchdog_check_every_secs", &self.watchdog_check_every_secs)
            .field("backoff_cap_secs", &self.backoff_cap_secs)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl HomeAssistantConfig {
    /// Validate and convert into [`ConnectionSettings`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyUrl`], [`ValidationError::InvalidUrl`]
    /// or [`ValidationError::EmptyToken`].
    pub fn settings(&self) -> Result<ConnectionSettings, ValidationError> {
        let url = websocket_url(&self.url)?;
        if self.token.trim().is_empty() {
            return Err(ValidationError::EmptyToken);
        }
        Ok(ConnectionSettings {
            url,
            token: self.token.trim().to_string(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            watchdog_max_age: Duration::from_secs(self.watchdog_max_age_secs),
            watchdog_check_every: Duration::from_secs(self.watchdog_check_every_secs.max(1)),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            event_buffer: self.event_buffer.max(1),
        })
    }
}

/// Validated connection parameters.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub url: Url,
    pub token: String,
    pub connect_timeout: Duration,
    pub watchdog_max_age: Duration,
    pub watchdog_check_every: Duration,
    pub backoff_cap: Duration,
    pub event_buffer: usize,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("watchdog_max_age", &self.watchdog_max_age)
            .field("watchdog_check_every", &self.watchdog_check_every)
            .field("backoff_cap", &self.backoff_cap)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

/// Websocket endpoint for a hub base URL (`http → ws`, `https → wss`).
///
/// # Errors
///
/// Returns [`ValidationError::EmptyUrl`] for a blank URL and
/// [`ValidationError::InvalidUrl`] when it cannot be parsed or uses an
/// unsupported scheme.
pub fn websocket_url(raw: &str) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    let invalid = || ValidationError::InvalidUrl(raw.to_string());

    let mut url = Url::parse(raw).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|()| invalid())?;

    let base = url.path().trim_end_matches('/');
    if !base.ends_with("/api/websocket") {
        let path = format!("{base}/api/websocket");
        url.set_path(&path);
    }
    Ok(url)
}
