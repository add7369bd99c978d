//! Error taxonomy shared by the services and the HTTP layer.
//!
//! Service code returns [`AppError`]; the HTTP layer turns it into a JSON
//! error body with the matching status code via [`IntoResponse`]. Startup
//! wiring in `main.rs` keeps using `anyhow`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

// ---

/// One offending input field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    // ---
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the machine registry, sensor ingestion and chat.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ---
    /// Malformed or out-of-range input, fixable by the caller.
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// A referenced entity does not exist.
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or referential-integrity violation.
    #[error("{0}")]
    Conflict(String),

    /// An external provider (language model, change feed) failed.
    #[error("{provider} request failed: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
    },

    /// A capability is missing the credentials it needs.
    #[error("{0}")]
    Configuration(String),

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Convenience `Result` alias for service operations.
pub type Result<T> = std::result::Result<T, AppError>;

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    // ---
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn machine_not_found(id: impl ToString) -> Self {
        AppError::NotFound {
            entity: "Machine",
            id: id.to_string(),
        }
    }

    pub fn conversation_not_found(id: impl ToString) -> Self {
        AppError::NotFound {
            entity: "Conversation",
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Upstream { .. } => "upstream",
            AppError::Configuration(_) => "configuration",
            AppError::Database(_) => "internal",
        }
    }
}

/// JSON body returned for every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database operation failed");
                "Internal server error".to_string()
            }
            AppError::Upstream { .. } => {
                tracing::error!(error = %self, "Upstream provider failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let details = match &self {
            AppError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.kind(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_status_mapping() {
        // ---
        assert_eq!(
            AppError::validation("airTemp", "bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::machine_not_found("abc").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Configuration("missing".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages() {
        // ---
        let err = AppError::machine_not_found("ZZZ999");
        assert_eq!(err.to_string(), "Machine with ID ZZZ999 not found");

        let err = AppError::Validation(vec![
            FieldError::new("airTemp", "must be between 0 and 500 Kelvin"),
            FieldError::new("torque", "must be between 0 and 200 Nm"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: airTemp must be between 0 and 500 Kelvin; torque must be between 0 and 200 Nm"
        );
    }
}
