use crate::services::relay_service::RelayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "err": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Map core errors onto wire statuses. Storage failures stay opaque 500s;
/// everything else tells the client what it did wrong.
impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        let status = match &err {
            RelayError::NotFound(_) | RelayError::StillUploading(_) => StatusCode::NOT_FOUND,
            RelayError::Closed(_)
            | RelayError::HashMismatch { .. }
            | RelayError::InvalidHash
            | RelayError::EmptyAuthor => StatusCode::BAD_REQUEST,
            RelayError::Duplicate(_) => StatusCode::CONFLICT,
            RelayError::Sqlx(_) | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
