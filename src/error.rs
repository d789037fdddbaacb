//! Error types shared by the provisioning, inference and presentation paths.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to download model artifact {remote_id}: {message}")]
    Download { remote_id: String, message: String },

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn download(remote_id: impl Into<String>, message: impl ToString) -> Self {
        Self::Download {
            remote_id: remote_id.into(),
            message: message.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::UnsupportedFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable name, used as a metrics label and in JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Download { .. } => "download",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::ModelLoad(_) => "model_load",
            Self::Model(_) => "model",
            Self::Io { .. } => "io",
            Self::Json(_) => "json",
            Self::Task(_) => "task",
            Self::Template(_) => "template",
            Self::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::warn!(kind = self.kind(), error = %self, "Request rejected");
        }

        let body = serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}
