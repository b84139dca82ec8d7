//! Error types for the dbtr server.

use std::path::PathBuf;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// dbtr core error.
    #[error("Core error: {0}")]
    Core(#[from] dbtr_core::Error),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ServerError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::BadRequest(e.body_text())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        use dbtr_core::Error as Core;
        match self {
            Self::BadRequest(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Core(Core::CorruptArchive { .. })
            | Self::Core(Core::InvalidConfig(_))
            | Self::Core(Core::Placement(_)) => StatusCode::BAD_REQUEST,
            Self::Core(Core::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(Core::DuplicateRun(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Internal details stay in the log.
            Self::Core(dbtr_core::Error::Server { run_id, .. }) => {
                tracing::error!("{}", self);
                serde_json::json!({"error": "internal server error", "run_id": run_id})
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("{}", self);
                serde_json::json!({"error": "internal server error"})
            }
            _ => serde_json::json!({"error": self.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let corrupt = ServerError::Core(dbtr_core::Error::corrupt_archive("x.zip", "bad"));
        assert_eq!(corrupt.status(), StatusCode::BAD_REQUEST);

        let missing = ServerError::Core(dbtr_core::Error::NotFound("r".to_string()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let duplicate = ServerError::Core(dbtr_core::Error::DuplicateRun("r".to_string()));
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let incomplete = ServerError::Core(dbtr_core::Error::IncompleteProject {
            run_id: "r".to_string(),
            failed: 0,
            pending: 3,
        });
        assert_eq!(incomplete.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let server = ServerError::Core(dbtr_core::Error::Server {
            run_id: "r".to_string(),
            source: Box::new(dbtr_core::Error::Engine("boom".to_string())),
        });
        assert_eq!(server.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
