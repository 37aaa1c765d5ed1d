use chrono::{DateTime, Utc};
use std::sync::Arc;
use crate::admin::AdminKey;
use crate::admission::AdmissionPolicy;
use crate::rate_limit::SlidingWindow;
use crate::store::AccessStore;
// app's shared state

pub struct AppState {
    pub store: Arc<AccessStore>,
    pub window: Arc<SlidingWindow>,
    pub policy: AdmissionPolicy,
    pub admin_key: AdminKey,
    pub trust_proxy: bool, // take client IP from forwarding headers
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: Arc<AccessStore>,
        window: Arc<SlidingWindow>,
        admin_key: AdminKey,
        trust_proxy: bool,
    ) -> Self {
        Self {
            policy: AdmissionPolicy::new(Arc::clone(&store), Arc::clone(&window)),
            store,
            window,
            admin_key,
            trust_proxy,
            started_at: Utc::now(),
        }
    }
}
