use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info};

use crate::metrics::TRACKED_IPS;
use crate::store::AccessStore;

// Sliding window of recent request timestamps per IP. Memory only.
#[derive(Default)]
pub struct SlidingWindow {
    hits: DashMap<String, Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    // Record a hit at `now` and return the count inside the window, this hit included
    pub fn record(&self, ip: &str, now: Instant, window: Duration) -> usize {
        let mut hits = self.hits.entry(ip.to_string()).or_default();
        hits.push(now);
        prune(&mut hits, now, window);
        hits.len()
    }

    // Hits inside the window without recording a new one
    pub fn count(&self, ip: &str, now: Instant, window: Duration) -> usize {
        self.hits
            .get(ip)
            .map(|hits| hits.iter().filter(|t| in_window(**t, now, window)).count())
            .unwrap_or(0)
    }

    // returns how many IPs were forgotten
    pub fn sweep(&self, now: Instant, window: Duration) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            prune(hits, now, window);
            !hits.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn tracked(&self) -> usize {
        self.hits.len()
    }
}

fn in_window(at: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(at) <= window
}

fn prune(hits: &mut Vec<Instant>, now: Instant, window: Duration) {
    hits.retain(|t| in_window(*t, now, window));
}

// Periodic sweep, independent of request traffic and of windowMs
pub async fn sweeper(window: Arc<SlidingWindow>, store: Arc<AccessStore>, every: Duration) {
    let mut ticker = interval(every);

    info!(interval = ?every, "sliding window sweeper started");

    loop {
        ticker.tick().await;

        let span = store.config().window();
        let forgotten = window.sweep(Instant::now(), span);
        TRACKED_IPS.set(window.tracked() as i64);

        if forgotten > 0 {
            debug!(forgotten, tracked = window.tracked(), "swept idle IPs");
        }
    }
}
