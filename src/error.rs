use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::Table;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {table} table: {source}")]
    Io {
        table: Table,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {table} table: {source}")]
    Parse {
        table: Table,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {table} table: {source}")]
    Encode {
        table: Table,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to append audit log: {0}")]
    Audit(#[source] std::io::Error),
}

// the only error that becomes an HTTP response
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("ADMIN_KEY not configured on server.")]
    NotConfigured,

    #[error("Unauthorized. Provide valid admin key in X-Admin-Key header.")]
    Unauthorized,

    #[error("Provide ip in request body to unban.")]
    MissingIp,

    #[error("IP {0} not found in ban list.")]
    NotFound(String),
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminError::MissingIp => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
