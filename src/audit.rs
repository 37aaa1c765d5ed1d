// Append-only audit trail. Lines are written by the persistence worker and
// never read back.
use chrono::{DateTime, SecondsFormat, Utc};

pub enum AuditEvent {
    Request {
        ip: String,
        method: String,
        path: String,
        count: usize,
    },
    // Admitted without counting (whitelisted, or limiting disabled)
    Bypass {
        ip: String,
        method: String,
        path: String,
        via: &'static str,
    },
    BlockedRequest {
        ip: String,
        method: String,
        path: String,
    },
    Ban {
        ip: String,
        method: String,
        path: String,
        count: usize,
        reason: String,
    },
    Unban {
        ip: String,
    },
}

impl AuditEvent {
    pub fn line(&self, at: DateTime<Utc>) -> String {
        let ts = at.to_rfc3339_opts(SecondsFormat::Millis, true);

        match self {
            AuditEvent::Request { ip, method, path, count } => {
                format!("[REQ] {ts} ip={ip} method={method} path={path} count={count}")
            }
            AuditEvent::Bypass { ip, method, path, via } => {
                format!("[REQ] {ts} ip={ip} method={method} path={path} count=0 bypass={via}")
            }
            AuditEvent::BlockedRequest { ip, method, path } => {
                format!("[BLOCKED_REQ] {ts} ip={ip} method={method} path={path} status=blocked")
            }
            AuditEvent::Ban { ip, method, path, count, reason } => format!(
                "[BAN] {ts} ip={ip} method={method} path={path} count={count} reason={reason}"
            ),
            AuditEvent::Unban { ip } => format!("[UNBAN] {ts} ip={ip} by=admin"),
        }
    }
}
