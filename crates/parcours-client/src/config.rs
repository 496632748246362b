//! Client configuration loaded from environment variables.
//!
//! All settings have defaults suitable for local development against a
//! backend on `localhost`.

use std::path::PathBuf;
use std::time::Duration;

use parcours_shared::constants::{
    DEFAULT_API_URL, DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use parcours_shared::UserId;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the backend REST API, without trailing slash.
    /// Env: `PARCOURS_API_URL`
    /// Default: `http://localhost:3000/api`
    pub api_url: String,

    /// Bearer credential sent on every request and on live channel connect.
    /// Env: `PARCOURS_TOKEN`
    pub token: Option<String>,

    /// Identifier of the signed-in user.
    /// Env: `PARCOURS_USER_ID`
    pub user_id: Option<UserId>,

    /// Organization that receives proof writes.
    /// Env: `PARCOURS_ORGANIZATION_ID`
    pub organization_id: Option<String>,

    /// Explicit path of the local database.
    /// Env: `PARCOURS_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,

    /// Period of the connectivity check.
    /// Env: `PARCOURS_HEALTH_CHECK_INTERVAL_SECS`
    /// Default: 15 s
    pub health_check_interval: Duration,

    /// Timeout applied to request/response calls (not to the live stream).
    /// Env: `PARCOURS_REQUEST_TIMEOUT_SECS`
    /// Default: 20 s
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            user_id: None,
            organization_id: None,
            db_path: None,
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

// The token must never reach the logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .field("organization_id", &self.organization_id)
            .field("db_path", &self.db_path)
            .field("health_check_interval", &self.health_check_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARCOURS_API_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.starts_with("http://") || url.starts_with("https://") {
                config.api_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid PARCOURS_API_URL, using default");
            }
        }

        if let Some(token) = lookup("PARCOURS_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }

        if let Some(id) = lookup("PARCOURS_USER_ID") {
            if !id.is_empty() {
                config.user_id = Some(UserId::new(id));
            }
        }

        if let Some(id) = lookup("PARCOURS_ORGANIZATION_ID") {
            if !id.is_empty() {
                config.organization_id = Some(id);
            }
        }

        if let Some(path) = lookup("PARCOURS_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("PARCOURS_HEALTH_CHECK_INTERVAL_SECS") {
            match parse_secs(&val) {
                Some(d) => config.health_check_interval = d,
                None => tracing::warn!(value = %val, "Invalid PARCOURS_HEALTH_CHECK_INTERVAL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("PARCOURS_REQUEST_TIMEOUT_SECS") {
            match parse_secs(&val) {
                Some(d) => config.request_timeout = d,
                None => tracing::warn!(value = %val, "Invalid PARCOURS_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// URL of the live channel endpoint.
    pub fn live_url(&self) -> String {
        format!("{}/live", self.api_url)
    }
}

/// Parse a strictly positive number of seconds.
fn parse_secs(val: &str) -> Option<Duration> {
    match val.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(Duration::from_secs(n)),
    }
}
