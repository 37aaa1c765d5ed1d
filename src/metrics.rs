use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};


lazy_static! {
    pub static ref REQUESTS_ADMITTED: IntCounter =
        register_int_counter!("gatekeeper_requests_admitted_total", "Requests let through the gate").unwrap();
    pub static ref REQUESTS_BLOCKED: IntCounter =
        register_int_counter!("gatekeeper_requests_blocked_total", "Requests rejected from banned IPs").unwrap();
    pub static ref REQUESTS_LIMITED: IntCounter =
        register_int_counter!("gatekeeper_requests_rate_limited_total", "Requests rejected for exceeding the window").unwrap();
    pub static ref BANS_ISSUED: IntCounter =
        register_int_counter!("gatekeeper_bans_issued_total", "IPs banned").unwrap();
    pub static ref UNBANS: IntCounter =
        register_int_counter!("gatekeeper_unbans_total", "IPs unbanned by an admin").unwrap();
    pub static ref TRACKED_IPS: IntGauge =
        register_int_gauge!("gatekeeper_tracked_ips", "IPs with hits in the sliding window").unwrap();
    pub static ref BANNED_IPS: IntGauge =
        register_int_gauge!("gatekeeper_banned_ips", "Entries in the ban table").unwrap();
}
