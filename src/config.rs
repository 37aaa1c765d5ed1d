use clap::Parser;
use std::path::PathBuf;

use crate::models::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS, RuntimeConfig};

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "ip-gatekeeper")]
#[command(about = "Rate limiting and IP access control in front of the API endpoints")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    // Ban table, whitelist and runtime config live here
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    // Audit log (request-logs.log) lives here
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    // Max requests per window, only used when no runtime config exists yet
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS)]
    pub rate_limit: u32,

    // Window in milliseconds, same caveat as above
    #[arg(long, default_value_t = DEFAULT_WINDOW_MS)]
    pub rate_window_ms: u64,

    // Seconds between sweeps of idle IPs out of the sliding window
    #[arg(long, default_value_t = 60)]
    pub sweep_interval: u64,

    // Always whitelisted, next to loopback
    // Example: "157.230.33.80,203.0.113.1"
    #[arg(long = "operator-ip", value_delimiter = ',')]
    pub operator_ips: Vec<String>,

    // Trust X-Forwarded-For / X-Real-IP (only behind a reverse proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    // Quiet period before reloading an externally edited table
    #[arg(long, default_value_t = 250)]
    pub watch_debounce_ms: u64,

    // Admin secret for /admin/*; admin endpoints refuse to work without it
    #[arg(long, env = "ADMIN_KEY", hide_env_values = true)]
    pub admin_key: Option<String>,
}

impl Args {
    pub fn default_runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_requests: self.rate_limit,
            window_ms: self.rate_window_ms,
            ..RuntimeConfig::default()
        }
    }
}
