//! API route definitions

use crate::admission::admission_middleware;
use crate::auth::middleware::optional_auth_middleware;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Routes mounted under `/api/v1/auth`
///
/// Every route passes principal resolution, then the admission gate.
pub fn auth_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(auth::register_handler))
        .route("/verify-email", get(auth::verify_email_handler))
        .route("/login", post(auth::login_handler))
        .route("/refresh-token", post(auth::refresh_handler))
        .route("/logout", post(auth::logout_handler))
        // Layers run bottom-up: the principal must be known before admission
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state,
            optional_auth_middleware,
        ))
}
