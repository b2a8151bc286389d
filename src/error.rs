//! Error types for Tilawa

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message shown to clients for any failure they cannot act on.
const INTERNAL_MESSAGE: &str = "حدث خطأ في الخادم";

#[derive(Error, Debug)]
pub enum TilawaError {
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many attempts, try again later")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl TilawaError {
    pub fn status(&self) -> StatusCode {
        match self {
            TilawaError::Validation(_) | TilawaError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            TilawaError::Unauthorized => StatusCode::UNAUTHORIZED,
            TilawaError::NotFound(_) => StatusCode::NOT_FOUND,
            TilawaError::Conflict(_) => StatusCode::CONFLICT,
            TilawaError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            TilawaError::Database(_) | TilawaError::Io(_) | TilawaError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for TilawaError {
    fn from(e: rusqlite::Error) -> Self {
        TilawaError::Database(e.to_string())
    }
}

impl From<std::io::Error> for TilawaError {
    fn from(e: std::io::Error) -> Self {
        TilawaError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TilawaError {
    fn from(e: serde_json::Error) -> Self {
        TilawaError::Other(format!("JSON error: {}", e))
    }
}

impl From<bcrypt::BcryptError> for TilawaError {
    fn from(e: bcrypt::BcryptError) -> Self {
        TilawaError::Other(format!("Password hashing failed: {}", e))
    }
}

impl From<tokio::task::JoinError> for TilawaError {
    fn from(e: tokio::task::JoinError) -> Self {
        TilawaError::Other(format!("Task join error: {}", e))
    }
}

impl IntoResponse for TilawaError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            TilawaError::Validation(messages) => json!({
                "error": "Validation failed",
                "details": messages,
            }),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "Request failed");
                json!({ "error": INTERNAL_MESSAGE })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
