mod admin;
mod health;
mod metrics;
mod status;

pub use admin::{bans_handler, stats_handler, unban_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use status::status_handler;
