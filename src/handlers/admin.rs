use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::admin;
use crate::error::AdminError;
use crate::state::AppState;

// Fields accepted from the JSON body and from the query string alike
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdminParams {
    ip: Option<String>,
    admin_key: Option<String>,
}

fn header_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-admin-key").and_then(|v| v.to_str().ok())
}

// Empty or non-JSON bodies are treated as carrying no fields
fn body_params(body: &Bytes) -> AdminParams {
    if body.is_empty() {
        return AdminParams::default();
    }
    serde_json::from_slice(body).unwrap_or_default()
}

// Same for a malformed query string, so errors keep the JSON shape
fn query_params(query: Result<Query<AdminParams>, QueryRejection>) -> AdminParams {
    query.map(|Query(params)| params).unwrap_or_default()
}

pub async fn unban_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<AdminParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<Value>, AdminError> {
    let query = query_params(query);
    let body = body_params(&body);
    let key = header_key(&headers)
        .or(body.admin_key.as_deref())
        .or(query.admin_key.as_deref());
    let ip = body.ip.as_deref().or(query.ip.as_deref());

    let ip = admin::unban(&state.store, &state.admin_key, ip, key)?;

    Ok(Json(json!({
        "success": true,
        "message": format!("IP {ip} unbanned."),
    })))
}

pub async fn bans_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<AdminParams>, QueryRejection>,
) -> Result<Json<Value>, AdminError> {
    let query = query_params(query);
    let key = header_key(&headers).or(query.admin_key.as_deref());
    state.admin_key.authorize(key)?;

    Ok(Json(json!({
        "success": true,
        "banned": state.store.banned_snapshot(),
    })))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<AdminParams>, QueryRejection>,
) -> Result<Json<Value>, AdminError> {
    let query = query_params(query);
    let key = header_key(&headers).or(query.admin_key.as_deref());
    state.admin_key.authorize(key)?;

    Ok(Json(json!({
        "success": true,
        "activeIps": state.window.tracked(),
        "bannedCount": state.store.banned_count(),
        "whitelistedCount": state.store.whitelisted_count(),
    })))
}
