use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use crate::admission::{Decision, normalize_ip};
use crate::audit::AuditEvent;
use crate::metrics::{REQUESTS_ADMITTED, REQUESTS_BLOCKED, REQUESTS_LIMITED};
use crate::models::BanRecord;
use crate::state::AppState;
use crate::store::AccessStore;

pub const BLOCKED_MESSAGE: &str = "Your IP has been blocked due to abuse or rate limit violations.";
pub const CONTACT_NOTE: &str = "Contact the owner to request unblocking.";

pub enum Rejection {
    Banned(BanRecord),
    RateLimited { message: String },
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::Banned(record) => {
                let body = json!({
                    "success": false,
                    "error": BLOCKED_MESSAGE,
                    "note": CONTACT_NOTE,
                    "bannedAt": record.banned_at,
                    "reason": record.reason,
                });
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
            Rejection::RateLimited { message } => {
                let body = json!({
                    "success": false,
                    "error": message,
                    "note": CONTACT_NOTE,
                });
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
            }
        }
    }
}

// forwarding headers only behind a trusted proxy, then the socket peer
pub fn client_ip(req: &Request, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| forwarded_for(req).or_else(|| real_ip(req)))
        .flatten();

    forwarded
        .or_else(|| req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip()))
        .map(|ip| normalize_ip(&ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// X-Forwarded-For: "client, proxy1, proxy2" -> leftmost
fn forwarded_for(req: &Request) -> Option<IpAddr> {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn real_ip(req: &Request) -> Option<IpAddr> {
    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

pub async fn request_gate(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, state.trust_proxy);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let decision = state.policy.evaluate(&ip, Instant::now());
    debug!(%ip, %method, %path, ?decision, "admission");

    match settle(&state.store, ip, method, path, decision) {
        Ok(()) => next.run(request).await,
        Err(rejection) => rejection.into_response(),
    }
}

// one audit line and one counter per request
fn settle(
    store: &AccessStore,
    ip: String,
    method: String,
    path: String,
    decision: Decision,
) -> Result<(), Rejection> {
    match decision {
        Decision::Bypass(via) => {
            store.audit(AuditEvent::Bypass { ip, method, path, via: via.as_str() });
            REQUESTS_ADMITTED.inc();
            Ok(())
        }
        Decision::Allow { count } => {
            store.audit(AuditEvent::Request { ip, method, path, count });
            REQUESTS_ADMITTED.inc();
            Ok(())
        }
        Decision::Blocked(record) => {
            store.audit(AuditEvent::BlockedRequest { ip, method, path });
            REQUESTS_BLOCKED.inc();
            Err(Rejection::Banned(record))
        }
        Decision::RateLimited { count, reason, message, fresh_ban } => {
            // only the request that created the ban record logs it
            if fresh_ban {
                store.audit(AuditEvent::Ban { ip, method, path, count, reason });
            } else {
                store.audit(AuditEvent::BlockedRequest { ip, method, path });
            }
            REQUESTS_LIMITED.inc();
            Err(Rejection::RateLimited { message })
        }
    }
}
