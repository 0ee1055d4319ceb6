//! Principal resolution for incoming requests
//!
//! Reads an optional bearer access token and, when it verifies, attaches the
//! caller's identity to the request extensions. Requests without a valid token
//! pass through unchanged and are treated as guests downstream.

use super::cookies::extract_bearer_token;
use super::tokens::{SessionClaims, TokenPurpose};
use crate::state::AppState;
use authgate_core::{Role, UserId};
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated caller extracted from an access token
///
/// Handlers read it with `Option<Extension<AuthenticatedUser>>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub role: Role,
}

/// Optional authentication middleware
///
/// Never rejects: invalid or expired tokens are ignored.
pub async fn optional_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer_token(request.headers()) {
        match state
            .tokens
            .verify::<SessionClaims>(TokenPurpose::Access, &token)
        {
            Ok(verified) => {
                request.extensions_mut().insert(AuthenticatedUser {
                    user_id: verified.subject,
                    role: verified.claims.role,
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring bearer token");
            }
        }
    }

    next.run(request).await
}
