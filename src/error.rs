use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Upstream answered with something other than what we asked for.
    #[error("Upstream source error: {0}")]
    Source(String),

    #[error("Upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed trade record: {0}")]
    MalformedRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Failures talking to an upstream collaborator, including a body that
    /// does not parse. The owning task skips the cycle and retries on the
    /// next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Http(_) | AppError::Json(_) | AppError::Source(_) | AppError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_payload_is_transient() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("<html>502</html>")
            .unwrap_err()
            .into();
        assert!(err.is_transient());
        assert!(AppError::Source("503".to_string()).is_transient());
    }

    #[test]
    fn storage_and_config_errors_are_not_transient() {
        assert!(!AppError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(!AppError::Config("bad".to_string()).is_transient());
        assert!(!AppError::MalformedRecord("no tx".to_string()).is_transient());
    }
}
