// In-memory tables are authoritative; every mutation queues a full snapshot
// for the persistence worker

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::admission::normalize_ip;
use crate::audit::AuditEvent;
use crate::backend::Backend;
use crate::error::StoreError;
use crate::metrics::{BANNED_IPS, BANS_ISSUED};
use crate::models::{BanRecord, BanTable, RuntimeConfig, WhitelistRecord, WhitelistTable};
use crate::worker::{PendingWrites, PersistJob, persist_worker};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Banned,
    Whitelist,
    Config,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Banned, Table::Whitelist, Table::Config];

    pub fn file_name(self) -> &'static str {
        match self {
            Table::Banned => "banned-ips.json",
            Table::Whitelist => "whitelist-ips.json",
            Table::Config => "rate-limit-config.json",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.file_name() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Banned => "ban",
            Table::Whitelist => "whitelist",
            Table::Config => "config",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct StoreOptions {
    // IP -> reason; always present in the whitelist
    pub pinned_whitelist: Vec<(String, String)>,
    // Written out when no config table exists yet
    pub default_config: RuntimeConfig,
}

impl StoreOptions {
    pub fn new(operator_ips: &[String], default_config: RuntimeConfig) -> Self {
        let mut pinned_whitelist = vec![
            ("127.0.0.1".to_string(), "Loopback".to_string()),
            ("::1".to_string(), "Loopback".to_string()),
        ];
        for ip in operator_ips {
            let ip = normalize_ip(ip);
            if !pinned_whitelist.iter().any(|(pinned, _)| *pinned == ip) {
                pinned_whitelist.push((ip, "Owner/Admin".to_string()));
            }
        }

        Self {
            pinned_whitelist,
            default_config: default_config.sanitized(),
        }
    }
}

pub struct AccessStore {
    backend: Arc<dyn Backend>,
    banned: RwLock<BanTable>,
    whitelist: RwLock<WhitelistTable>,
    config: RwLock<RuntimeConfig>,
    options: StoreOptions,
    jobs: mpsc::UnboundedSender<PersistJob>,
    pending: Arc<PendingWrites>,
    // SHA-256 of the last snapshot queued per table, to recognise our own writes
    fingerprints: DashMap<Table, [u8; 32]>,
}

fn fingerprint(contents: &[u8]) -> [u8; 32] {
    Sha256::digest(contents).into()
}

// Hand-edited tables may spell an address as `::ffff:a.b.c.d`
fn normalize_keys<V>(table: BTreeMap<String, V>) -> BTreeMap<String, V> {
    table
        .into_iter()
        .map(|(ip, record)| (normalize_ip(&ip), record))
        .collect()
}

impl AccessStore {
    // missing tables are created, unparseable ones start empty and are left on disk
    pub fn init(backend: Arc<dyn Backend>, options: StoreOptions) -> Arc<Self> {
        let (jobs, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingWrites::default());
        tokio::spawn(persist_worker(rx, Arc::clone(&backend), Arc::clone(&pending)));

        let store = Arc::new(Self {
            backend,
            banned: RwLock::new(BanTable::new()),
            whitelist: RwLock::new(WhitelistTable::new()),
            config: RwLock::new(options.default_config.clone()),
            options,
            jobs,
            pending,
            fingerprints: DashMap::new(),
        });

        {
            let mut banned = store.banned.write();
            match store.read_table::<BanTable>(Table::Banned) {
                Ok(Some((table, digest))) => {
                    store.fingerprints.insert(Table::Banned, digest);
                    *banned = normalize_keys(table);
                }
                Ok(None) => store.enqueue(Table::Banned, &*banned),
                Err(e) => error!(error = %e, "failed to load ban table, starting empty"),
            }
            BANNED_IPS.set(banned.len() as i64);
        }

        {
            let mut whitelist = store.whitelist.write();
            let mut dirty = false;
            let mut load_failed = false;
            match store.read_table::<WhitelistTable>(Table::Whitelist) {
                Ok(Some((table, digest))) => {
                    store.fingerprints.insert(Table::Whitelist, digest);
                    *whitelist = normalize_keys(table);
                }
                Ok(None) => dirty = true,
                Err(e) => {
                    error!(error = %e, "failed to load whitelist, starting with pinned entries");
                    load_failed = true;
                }
            }
            // a broken file stays on disk until the operator fixes it
            let healed = store.heal_whitelist(&mut whitelist);
            if (healed || dirty) && !load_failed {
                store.enqueue(Table::Whitelist, &*whitelist);
            }
        }

        {
            let mut config = store.config.write();
            match store.read_table::<RuntimeConfig>(Table::Config) {
                Ok(Some((loaded, digest))) => {
                    store.fingerprints.insert(Table::Config, digest);
                    *config = loaded.sanitized();
                }
                Ok(None) => store.enqueue(Table::Config, &*config),
                Err(e) => error!(error = %e, "failed to load runtime config, using defaults"),
            }
        }

        info!(
            banned = store.banned.read().len(),
            whitelisted = store.whitelist.read().len(),
            config = ?*store.config.read(),
            "access store ready"
        );

        store
    }

    // Ok(true) when in-memory state was replaced
    pub fn reload(&self, table: Table) -> Result<bool, StoreError> {
        match table {
            Table::Banned => {
                let mut banned = self.banned.write();
                let Some(fresh) = self.read_external::<BanTable>(table)? else {
                    return Ok(false);
                };
                *banned = normalize_keys(fresh);
                BANNED_IPS.set(banned.len() as i64);
                info!(count = banned.len(), "ban table reloaded");
            }
            Table::Whitelist => {
                let mut whitelist = self.whitelist.write();
                let Some(fresh) = self.read_external::<WhitelistTable>(table)? else {
                    return Ok(false);
                };
                *whitelist = normalize_keys(fresh);
                if self.heal_whitelist(&mut whitelist) {
                    self.enqueue(Table::Whitelist, &*whitelist);
                }
                info!(count = whitelist.len(), "whitelist reloaded");
            }
            Table::Config => {
                let mut config = self.config.write();
                let Some(fresh) = self.read_external::<RuntimeConfig>(table)? else {
                    return Ok(false);
                };
                *config = fresh.sanitized();
                info!(config = ?*config, "runtime config reloaded");
            }
        }
        Ok(true)
    }

    // Wait until every write and audit line queued so far has been handled
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.jobs.send(PersistJob::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub async fn shutdown(&self) {
        self.flush().await;
        info!("access store flushed");
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config.read().clone()
    }

    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.read().contains_key(ip)
    }

    pub fn ban_record(&self, ip: &str) -> Option<BanRecord> {
        self.banned.read().get(ip).cloned()
    }

    // false when the IP was already banned
    pub fn ban(&self, ip: &str, reason: &str, by: &str) -> bool {
        let mut banned = self.banned.write();
        if banned.contains_key(ip) {
            return false;
        }

        banned.insert(
            ip.to_string(),
            BanRecord {
                banned_at: Utc::now(),
                reason: reason.to_string(),
                by: by.to_string(),
            },
        );
        self.enqueue(Table::Banned, &*banned);

        BANS_ISSUED.inc();
        BANNED_IPS.set(banned.len() as i64);
        warn!(%ip, %reason, %by, "ip banned");
        true
    }

    // Returns false when the IP was not banned
    pub fn unban(&self, ip: &str) -> bool {
        let mut banned = self.banned.write();
        if banned.remove(ip).is_none() {
            return false;
        }
        self.enqueue(Table::Banned, &*banned);
        BANNED_IPS.set(banned.len() as i64);
        true
    }

    pub fn banned_snapshot(&self) -> BanTable {
        self.banned.read().clone()
    }

    pub fn banned_count(&self) -> usize {
        self.banned.read().len()
    }

    pub fn whitelisted_count(&self) -> usize {
        self.whitelist.read().len()
    }

    pub fn audit(&self, event: AuditEvent) {
        let line = event.line(Utc::now());
        if self.jobs.send(PersistJob::Audit(line)).is_err() {
            warn!("persistence worker gone, audit entry dropped");
        }
    }

    fn heal_whitelist(&self, whitelist: &mut WhitelistTable) -> bool {
        let mut healed = false;
        for (ip, reason) in &self.options.pinned_whitelist {
            if !whitelist.contains_key(ip) {
                whitelist.insert(
                    ip.clone(),
                    WhitelistRecord {
                        added_at: Utc::now(),
                        reason: reason.clone(),
                    },
                );
                debug!(%ip, "pinned whitelist entry restored");
                healed = true;
            }
        }
        healed
    }

    // Must be called with the table's write lock held so snapshots hit the
    // queue in the same order the mutations happened
    fn enqueue<T: Serialize>(&self, table: Table, value: &T) {
        let contents = match serde_json::to_vec_pretty(value) {
            Ok(contents) => contents,
            Err(source) => {
                let e = StoreError::Encode { table, source };
                error!(error = %e, "table not saved");
                return;
            }
        };

        self.fingerprints.insert(table, fingerprint(&contents));
        self.pending.begin(table);
        if self.jobs.send(PersistJob::Write { table, contents }).is_err() {
            self.pending.finish(table);
            warn!(%table, "persistence worker gone, write dropped");
        }
    }

    fn read_table<T>(&self, table: Table) -> Result<Option<(T, [u8; 32])>, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let raw = self
            .backend
            .read(table)
            .map_err(|source| StoreError::Io { table, source })?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let digest = fingerprint(&raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some((T::default(), digest)));
        }
        let value =
            serde_json::from_slice(&raw).map_err(|source| StoreError::Parse { table, source })?;
        Ok(Some((value, digest)))
    }

    fn read_external<T>(&self, table: Table) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        if self.pending.in_flight(table) > 0 {
            debug!(%table, "write pending, reload skipped");
            return Ok(None);
        }

        let Some((value, digest)) = self.read_table::<T>(table)? else {
            warn!(%table, "table disappeared, keeping in-memory state");
            return Ok(None);
        };

        if self.fingerprints.get(&table).is_some_and(|known| *known == digest) {
            debug!(%table, "table unchanged since last load or write, reload skipped");
            return Ok(None);
        }
        self.fingerprints.insert(table, digest);
        Ok(Some(value))
    }
}

#[cfg(test)]
pub(crate) fn memory_store(
    config: RuntimeConfig,
) -> (Arc<crate::backend::MemoryBackend>, Arc<AccessStore>) {
    let backend = Arc::new(crate::backend::MemoryBackend::default());
    backend.put(Table::Config, &serde_json::to_string(&config).unwrap());
    let store = AccessStore::init(backend.clone(), StoreOptions::new(&[], config));
    (backend, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn options() -> StoreOptions {
        StoreOptions::new(&["::ffff:157.230.33.80".to_string()], RuntimeConfig::default())
    }

    #[tokio::test]
    async fn init_creates_missing_tables() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.flush().await;

        assert_eq!(backend.contents(Table::Banned).unwrap().trim(), "{}");
        let config: RuntimeConfig =
            serde_json::from_str(&backend.contents(Table::Config).unwrap()).unwrap();
        assert_eq!(config, RuntimeConfig::default());

        let whitelist: WhitelistTable =
            serde_json::from_str(&backend.contents(Table::Whitelist).unwrap()).unwrap();
        assert!(whitelist.contains_key("127.0.0.1"));
        assert!(whitelist.contains_key("::1"));
        assert!(whitelist.contains_key("157.230.33.80"));
    }

    #[tokio::test]
    async fn unparseable_ban_table_starts_empty() {
        let backend = Arc::new(MemoryBackend::default());
        backend.put(Table::Banned, "{ not json");
        let store = AccessStore::init(backend.clone(), options());

        assert_eq!(store.banned_count(), 0);
        store.flush().await;
        // the broken file is left for the operator to fix
        assert_eq!(backend.contents(Table::Banned).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn unparseable_whitelist_is_healed_in_memory_only() {
        let backend = Arc::new(MemoryBackend::default());
        let broken = r#"{"192.0.2.10": {"addedAt": "2025-01-01T00:00:00Z", "reason": "partner"},}"#;
        backend.put(Table::Whitelist, broken);
        let store = AccessStore::init(backend.clone(), options());

        assert!(store.is_whitelisted("127.0.0.1"));
        assert!(store.is_whitelisted("157.230.33.80"));
        store.flush().await;
        assert_eq!(backend.contents(Table::Whitelist).unwrap(), broken);
    }

    #[tokio::test]
    async fn empty_files_count_as_empty_tables() {
        let backend = Arc::new(MemoryBackend::default());
        backend.put(Table::Banned, "");
        backend.put(Table::Config, "\n");
        let store = AccessStore::init(backend, options());

        assert_eq!(store.banned_count(), 0);
        assert_eq!(store.config(), RuntimeConfig::default());
    }

    #[tokio::test]
    async fn config_file_values_override_defaults() {
        let backend = Arc::new(MemoryBackend::default());
        backend.put(Table::Config, r#"{"enabled": false, "windowMs": 0}"#);
        let store = AccessStore::init(backend, options());

        let config = store.config();
        assert!(!config.enabled);
        assert_eq!(config.window_ms, crate::models::DEFAULT_WINDOW_MS);
    }

    #[tokio::test]
    async fn ban_is_persisted_and_not_duplicated() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());

        assert!(store.ban("203.0.113.5", "manual", "admin"));
        assert!(!store.ban("203.0.113.5", "again", "admin"));
        store.flush().await;

        let table: BanTable =
            serde_json::from_str(&backend.contents(Table::Banned).unwrap()).unwrap();
        assert_eq!(table["203.0.113.5"].reason, "manual");
        assert_eq!(table["203.0.113.5"].by, "admin");
    }

    #[tokio::test]
    async fn reload_picks_up_external_edits() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.flush().await;

        backend.put(
            Table::Banned,
            r#"{"192.0.2.44": {"bannedAt": "2025-01-01T00:00:00Z", "reason": "manual", "by": "ops"}}"#,
        );
        backend.put(Table::Config, r#"{"maxRequests": 3, "windowMs": 1000}"#);

        assert!(store.reload(Table::Banned).unwrap());
        assert!(store.reload(Table::Config).unwrap());
        assert_eq!(store.ban_record("192.0.2.44").unwrap().by, "ops");
        assert_eq!(store.config().max_requests, 3);
    }

    #[tokio::test]
    async fn mapped_addresses_in_edited_tables_are_normalized() {
        let backend = Arc::new(MemoryBackend::default());
        backend.put(
            Table::Banned,
            r#"{"::ffff:203.0.113.5": {"bannedAt": "2025-01-01T00:00:00Z", "reason": "manual"}}"#,
        );
        let store = AccessStore::init(backend, options());

        assert!(store.ban_record("203.0.113.5").is_some());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_state() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.ban("203.0.113.7", "manual", "admin");
        store.flush().await;

        backend.put(Table::Banned, "[oops");
        assert!(matches!(store.reload(Table::Banned), Err(StoreError::Parse { .. })));
        assert!(store.ban_record("203.0.113.7").is_some());
    }

    #[tokio::test]
    async fn reload_of_own_write_is_ignored() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.ban("203.0.113.8", "manual", "admin");
        store.flush().await;

        assert!(!store.reload(Table::Banned).unwrap());
        assert!(store.ban_record("203.0.113.8").is_some());
    }

    #[tokio::test]
    async fn reload_waits_for_pending_writes() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.ban("203.0.113.9", "manual", "admin");
        store.flush().await;

        // a queued snapshot of ours is newer than anything on disk
        store.pending.begin(Table::Banned);
        backend.put(
            Table::Banned,
            r#"{"192.0.2.45": {"bannedAt": "2025-01-01T00:00:00Z", "reason": "manual"}}"#,
        );
        assert!(!store.reload(Table::Banned).unwrap());
        assert!(store.ban_record("203.0.113.9").is_some());
        assert!(store.ban_record("192.0.2.45").is_none());

        store.pending.finish(Table::Banned);
        assert!(store.reload(Table::Banned).unwrap());
        assert!(store.ban_record("192.0.2.45").is_some());
        assert!(store.ban_record("203.0.113.9").is_none());
    }

    #[tokio::test]
    async fn whitelist_reload_restores_pinned_entries() {
        let backend = Arc::new(MemoryBackend::default());
        let store = AccessStore::init(backend.clone(), options());
        store.flush().await;

        backend.put(
            Table::Whitelist,
            r#"{"192.0.2.10": {"addedAt": "2025-01-01T00:00:00Z", "reason": "partner"}}"#,
        );
        assert!(store.reload(Table::Whitelist).unwrap());
        assert!(store.is_whitelisted("192.0.2.10"));
        assert!(store.is_whitelisted("127.0.0.1"));
        assert!(store.is_whitelisted("157.230.33.80"));

        store.flush().await;
        let on_disk: WhitelistTable =
            serde_json::from_str(&backend.contents(Table::Whitelist).unwrap()).unwrap();
        assert!(on_disk.contains_key("127.0.0.1"));
        assert!(on_disk.contains_key("192.0.2.10"));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let backend = Arc::new(MemoryBackend::default());
        let first = AccessStore::init(backend.clone(), options());
        first.ban("198.51.100.20", "manual", "admin");
        first.shutdown().await;

        let second = AccessStore::init(backend.clone(), options());
        assert!(second.ban_record("198.51.100.20").is_some());
        assert!(second.is_whitelisted("157.230.33.80"));
    }

    #[test]
    fn table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_file_name(table.file_name()), Some(table));
        }
        assert_eq!(Table::from_file_name("banned-ips.json.tmp"), None);
    }
}
