// Precedence: whitelist, then ban table, then the `enabled` switch, then the
// sliding window. Switching limiting off still blocks banned IPs.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{BanRecord, RATE_LIMITER_ORIGIN};
use crate::rate_limit::SlidingWindow;
use crate::store::AccessStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bypass {
    Whitelisted,
    Disabled,
}

impl Bypass {
    pub fn as_str(self) -> &'static str {
        match self {
            Bypass::Whitelisted => "whitelist",
            Bypass::Disabled => "disabled",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Bypass(Bypass),
    Allow { count: usize },
    // Already in the ban table; the window is left untouched
    Blocked(BanRecord),
    // This request pushed the count over maxRequests
    RateLimited {
        count: usize,
        reason: String,
        message: String,
        // false when a concurrent request from the same IP won the ban insert
        fresh_ban: bool,
    },
}

// `::ffff:a.b.c.d` and `a.b.c.d` share state
pub fn normalize_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Err(_) => {
            let lower = trimmed.to_ascii_lowercase();
            match lower.strip_prefix("::ffff:") {
                Some(rest) => rest.to_string(),
                None => trimmed.to_string(),
            }
        }
    }
}

pub struct AdmissionPolicy {
    store: Arc<AccessStore>,
    window: Arc<SlidingWindow>,
}

impl AdmissionPolicy {
    pub fn new(store: Arc<AccessStore>, window: Arc<SlidingWindow>) -> Self {
        Self { store, window }
    }

    pub fn evaluate(&self, ip: &str, now: Instant) -> Decision {
        let ip = normalize_ip(ip);

        if self.store.is_whitelisted(&ip) {
            return Decision::Bypass(Bypass::Whitelisted);
        }

        if let Some(record) = self.store.ban_record(&ip) {
            return Decision::Blocked(record);
        }

        let config = self.store.config();
        if !config.enabled {
            return Decision::Bypass(Bypass::Disabled);
        }

        let count = self.window.record(&ip, now, config.window());
        if count > config.max_requests as usize {
            let reason = config.ban_reason();
            let fresh_ban = self.store.ban(&ip, &reason, RATE_LIMITER_ORIGIN);
            return Decision::RateLimited {
                count,
                reason,
                message: config.limit_message(),
                fresh_ban,
            };
        }

        Decision::Allow { count }
    }
}
