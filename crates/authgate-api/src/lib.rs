//! Authgate API
//!
//! HTTP service for the account lifecycle (register, verify email, login,
//! refresh, logout) behind a per-role request admission gate.

pub mod admission;
pub mod audit;
pub mod auth;
pub mod email;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod response;
pub mod routes;
pub mod state;

use crate::openapi::{OPENAPI_JSON_PATH, SWAGGER_UI_PATH};
use crate::state::AppState;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa_swagger_ui::SwaggerUi;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let policy = state.error_policy();

    Router::new()
        .nest("/api/v1/auth", routes::auth_routes(state.clone()))
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
        .merge(SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, openapi::openapi()))
        .fallback(error::not_found)
        .layer(middleware::from_fn_with_state(
            policy,
            error::error_envelope,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Configuration used by [`create_test_app`]: fixed secrets, cheap hashing
#[cfg(any(test, feature = "test-utils"))]
pub fn test_config() -> authgate_core::AppConfig {
    use authgate_core::{AppConfig, Environment, PasswordConfig};

    let mut config = AppConfig {
        environment: Environment::Test,
        password: PasswordConfig::insecure_for_tests(),
        ..Default::default()
    };
    config.tokens.access_secret = Some("test-access-secret".to_string());
    config.tokens.refresh_secret = Some("test-refresh-secret".to_string());
    config.tokens.email_verification_secret = Some("test-verification-secret".to_string());
    config.tokens.allow_secret_fallback = false;
    config
}

/// In-memory application plus the outbox that receives verification emails
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_app() -> anyhow::Result<(Router, email::MemoryOutbox)> {
    create_test_app_with_config(test_config())
}

/// Like [`create_test_app`], with a caller-adjusted configuration
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_app_with_config(
    config: authgate_core::AppConfig,
) -> anyhow::Result<(Router, email::MemoryOutbox)> {
    let outbox = email::MemoryOutbox::new();
    let state = AppState::in_memory(config, Arc::new(outbox.clone()))?;
    Ok((create_router(Arc::new(state)), outbox))
}

/// In-memory application for tests that do not read emails
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> anyhow::Result<Router> {
    create_test_app().map(|(router, _)| router)
}
