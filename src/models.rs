use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_REQUESTS: u32 = 25;
pub const DEFAULT_WINDOW_MS: u64 = 10_000;

// Originator tag written into bans issued by the admission policy
pub const RATE_LIMITER_ORIGIN: &str = "rateLimiter";

// bans never expire
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    pub banned_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default = "default_origin")]
    pub by: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistRecord {
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

// IP string -> record. BTreeMap keeps the JSON files diff-friendly.
pub type BanTable = BTreeMap<String, BanRecord>;
pub type WhitelistTable = BTreeMap<String, WhitelistRecord>;

fn default_origin() -> String {
    "unknown".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    // Overrides the 429 error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            message: None,
        }
    }
}

impl RuntimeConfig {
    // zero limits fall back to the defaults
    pub fn sanitized(mut self) -> Self {
        if self.max_requests == 0 {
            warn!(default = DEFAULT_MAX_REQUESTS, "maxRequests must be positive, using default");
            self.max_requests = DEFAULT_MAX_REQUESTS;
        }
        if self.window_ms == 0 {
            warn!(default = DEFAULT_WINDOW_MS, "windowMs must be positive, using default");
            self.window_ms = DEFAULT_WINDOW_MS;
        }
        if self.message.as_deref().is_some_and(|m| m.trim().is_empty()) {
            self.message = None;
        }
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    // Reason stored on a ban issued for exceeding this config's threshold
    pub fn ban_reason(&self) -> String {
        format!("exceeded_{}_per_{}ms", self.max_requests, self.window_ms)
    }

    pub fn limit_message(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "Rate limit exceeded - your IP has been blocked. Max {} requests per {}s.",
                self.max_requests,
                self.window_ms as f64 / 1000.0
            ),
        }
    }
}
