//! API error handling
//!
//! Handlers return [`AppError`]. Its `IntoResponse` renders the public error
//! envelope and attaches an [`ErrorReport`] to the response extensions. The
//! [`error_envelope`] middleware is the single place that decides whether
//! internal detail may be shown to the caller.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Request, State,
    },
    http::{StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Message shown in place of any non-operational failure
pub const GENERIC_MESSAGE: &str = "Something went wrong";

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Same message for unknown email and wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many requests")]
    RateLimited,

    /// A store or oracle call exceeded its deadline; retryable by the caller
    #[error("{0}")]
    Timeout(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }

    pub fn unauthorized() -> Self {
        AppError::Unauthorized("Unauthorized".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operational errors are raised deliberately and may show their message
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        AppError::validation("invalid request body")
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected query string");
        AppError::validation("invalid query string")
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[schema(example = 400)]
    pub status_code: u16,
    /// `fail` for 4xx, `error` for 5xx
    #[schema(example = "fail")]
    pub status: String,
    pub success: bool,
    pub message: String,
    /// Error chain, development mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    fn new(status: StatusCode, message: String, stack: Option<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            status: if status.is_client_error() { "fail" } else { "error" }.to_string(),
            success: false,
            message,
            stack,
        }
    }
}

/// What went wrong, kept on the response for the terminal handler
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub message: String,
    pub operational: bool,
    /// Full error chain of a non-operational failure
    pub detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let operational = self.is_operational();
        let message = self.to_string();
        let detail = match &self {
            AppError::Internal(err) => Some(format!("{err:?}")),
            _ => None,
        };

        let public_message = if operational {
            message.clone()
        } else {
            GENERIC_MESSAGE.to_string()
        };

        let mut response = (status, Json(ErrorBody::new(status, public_message, None))).into_response();
        response.extensions_mut().insert(ErrorReport {
            status,
            message,
            operational,
            detail,
        });
        response
    }
}

/// Development-mode switch for error rendering
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPolicy {
    pub expose_internal: bool,
}

/// Terminal error handler
///
/// Logs every error response and, when the policy allows, re-renders it with
/// the real message and error chain.
pub async fn error_envelope(
    State(policy): State<ErrorPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };

    if report.operational {
        tracing::debug!(status = %report.status, message = %report.message, "request failed");
    } else {
        tracing::error!(
            status = %report.status,
            error = %report.detail.as_deref().unwrap_or(&report.message),
            "request failed with internal error"
        );
    }

    if !policy.expose_internal {
        return response;
    }

    let (mut parts, _) = response.into_parts();
    let body = ErrorBody::new(report.status, report.message, report.detail);
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    let rebuilt = Json(body).into_response();
    let (rebuilt_parts, rebuilt_body) = rebuilt.into_parts();
    parts.headers.extend(rebuilt_parts.headers);
    Response::from_parts(parts, rebuilt_body)
}

/// Fallback for unmatched routes
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Can't find {} on this server", uri.path()))
}
