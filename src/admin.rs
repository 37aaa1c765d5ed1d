use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::admission::normalize_ip;
use crate::audit::AuditEvent;
use crate::error::AdminError;
use crate::metrics::UNBANS;
use crate::store::AccessStore;

// only the digest of the admin secret is kept
pub struct AdminKey {
    digest: Option<[u8; 32]>,
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

impl AdminKey {
    // An empty secret counts as not configured
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            digest: secret.filter(|s| !s.is_empty()).map(digest),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    pub fn authorize(&self, provided: Option<&str>) -> Result<(), AdminError> {
        let expected = self.digest.as_ref().ok_or(AdminError::NotConfigured)?;
        let provided = provided.ok_or(AdminError::Unauthorized)?;

        let provided = digest(provided);
        if bool::from(expected[..].ct_eq(&provided[..])) {
            Ok(())
        } else {
            warn!("admin request with wrong key");
            Err(AdminError::Unauthorized)
        }
    }
}

// Returns the normalized IP. The sliding window is left alone.
pub fn unban(
    store: &AccessStore,
    admin_key: &AdminKey,
    ip: Option<&str>,
    provided_key: Option<&str>,
) -> Result<String, AdminError> {
    admin_key.authorize(provided_key)?;

    let ip = ip
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(normalize_ip)
        .ok_or(AdminError::MissingIp)?;

    if !store.unban(&ip) {
        return Err(AdminError::NotFound(ip));
    }

    store.audit(AuditEvent::Unban { ip: ip.clone() });
    UNBANS.inc();
    info!(%ip, "ip unbanned");
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionPolicy, Decision};
    use crate::models::RuntimeConfig;
    use crate::rate_limit::SlidingWindow;
    use crate::store::memory_store;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const KEY: &str = "s3cret";

    #[test]
    fn authorize_compares_the_whole_key() {
        let key = AdminKey::new(Some(KEY));
        assert_eq!(key.authorize(Some(KEY)), Ok(()));
        assert_eq!(key.authorize(Some("s3cre")), Err(AdminError::Unauthorized));
        assert_eq!(key.authorize(Some("s3cret ")), Err(AdminError::Unauthorized));
        assert_eq!(key.authorize(Some("")), Err(AdminError::Unauthorized));
    }

    #[tokio::test]
    async fn fails_closed_without_a_configured_key() {
        let (_, store) = memory_store(RuntimeConfig::default());
        store.ban("192.0.2.1", "manual", "admin");

        for secret in [None, Some("")] {
            let key = AdminKey::new(secret);
            assert!(!key.is_configured());
            assert_eq!(
                unban(&store, &key, Some("192.0.2.1"), Some("anything")),
                Err(AdminError::NotConfigured)
            );
        }
        assert!(store.ban_record("192.0.2.1").is_some());
    }

    #[tokio::test]
    async fn wrong_key_does_not_reveal_ban_state() {
        let (_, store) = memory_store(RuntimeConfig::default());
        store.ban("192.0.2.1", "manual", "admin");
        let key = AdminKey::new(Some(KEY));

        assert_eq!(unban(&store, &key, Some("192.0.2.1"), Some("nope")), Err(AdminError::Unauthorized));
        assert_eq!(unban(&store, &key, Some("192.0.2.99"), Some("nope")), Err(AdminError::Unauthorized));
        assert_eq!(unban(&store, &key, Some("192.0.2.1"), None), Err(AdminError::Unauthorized));
    }

    #[tokio::test]
    async fn missing_ip_is_a_validation_error() {
        let (_, store) = memory_store(RuntimeConfig::default());
        let key = AdminKey::new(Some(KEY));

        assert_eq!(unban(&store, &key, None, Some(KEY)), Err(AdminError::MissingIp));
        assert_eq!(unban(&store, &key, Some("  "), Some(KEY)), Err(AdminError::MissingIp));
    }

    #[tokio::test]
    async fn second_unban_is_not_found() {
        let (backend, store) = memory_store(RuntimeConfig::default());
        store.ban("203.0.113.5", "manual", "admin");
        let key = AdminKey::new(Some(KEY));

        assert_eq!(unban(&store, &key, Some("::ffff:203.0.113.5"), Some(KEY)), Ok("203.0.113.5".to_string()));
        assert_eq!(
            unban(&store, &key, Some("203.0.113.5"), Some(KEY)),
            Err(AdminError::NotFound("203.0.113.5".to_string()))
        );

        store.flush().await;
        assert!(backend.audit_lines().iter().any(|l| l.starts_with("[UNBAN]") && l.contains("ip=203.0.113.5")));
        assert!(!backend.contents(crate::store::Table::Banned).unwrap().contains("203.0.113.5"));
    }

    #[tokio::test]
    async fn unban_leaves_the_window_alone() {
        let config = RuntimeConfig {
            max_requests: 3,
            ..RuntimeConfig::default()
        };
        let (_, store) = memory_store(config);
        let window = Arc::new(SlidingWindow::new());
        let policy = AdmissionPolicy::new(Arc::clone(&store), Arc::clone(&window));
        let start = Instant::now();

        for _ in 0..4 {
            policy.evaluate("198.51.100.9", start);
        }
        unban(&store, &AdminKey::new(Some(KEY)), Some("198.51.100.9"), Some(KEY)).unwrap();

        // the four earlier hits are still in the window, so the next one bans again
        assert_eq!(window.count("198.51.100.9", start, Duration::from_secs(10)), 4);
        assert!(matches!(policy.evaluate("198.51.100.9", start), Decision::RateLimited { .. }));

        // once they age out the IP starts fresh
        unban(&store, &AdminKey::new(Some(KEY)), Some("198.51.100.9"), Some(KEY)).unwrap();
        let later = start + Duration::from_secs(11);
        assert_eq!(policy.evaluate("198.51.100.9", later), Decision::Allow { count: 1 });
    }
}
