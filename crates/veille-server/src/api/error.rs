//! Handler errors and their JSON rendering.
//!
//! Every handler returns [`ApiResult`]; errors render as a JSON
//! [`ErrorResponse`] with a matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use veille_core::VeilleError;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error returned by every handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
    },

    /// 403 Forbidden - The radio refused access.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    #[error("Not Found: {message}")]
    NotFound {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
    },

    /// 409 Conflict - Not possible in the current monitoring phase.
    #[error("Conflict: {message}")]
    Conflict {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
    },

    /// 422 Unprocessable Entity - Well-formed but invalid values.
    #[error("Unprocessable Entity: {message}")]
    Unprocessable {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - The radio is unavailable or failed.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Stable `SCREAMING_SNAKE` code.
        error_code: String,
        /// What went wrong.
        message: String,
        /// Extra context for the logs.
        details: Option<String>,
    },
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "MONITORING_NOT_ACTIVE",
    "message": "Monitoring is not active",
    "details": null
}))]
pub struct ErrorResponse {
    /// Stable `SCREAMING_SNAKE` code.
    #[schema(example = "MONITORING_NOT_ACTIVE")]
    pub error: String,

    /// What went wrong.
    #[schema(example = "Monitoring is not active")]
    pub message: String,

    /// Extra context, if any.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::Forbidden {
                error_code,
                message,
            }
            | Self::NotFound {
                error_code,
                message,
            }
            | Self::Conflict {
                error_code,
                message,
            }
            | Self::Unprocessable {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(serde_json::Value::String),
                }
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details: details.map(serde_json::Value::String),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert from veille_core errors.
impl From<VeilleError> for ApiError {
    fn from(err: VeilleError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();
        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
            },
            403 => Self::Forbidden {
                error_code,
                message,
            },
            404 => Self::NotFound {
                error_code,
                message,
            },
            409 => Self::Conflict {
                error_code,
                message,
            },
            422 => Self::Unprocessable {
                error_code,
                message,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<veille_core::ConfigError> for ApiError {
    fn from(err: veille_core::ConfigError) -> Self {
        Self::from(VeilleError::from(err))
    }
}
