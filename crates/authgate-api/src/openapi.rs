//! OpenAPI document for the public endpoints

use crate::auth::models::{
    AccessTokenPayload, LoginRequest, RefreshTokenRequest, RegisterRequest, SessionPayload,
    UserPayload, UserView,
};
use crate::error::ErrorBody;
use crate::handlers::{auth, health};
use utoipa::OpenApi;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";
pub const SWAGGER_UI_PATH: &str = "/swagger-ui";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Authgate API",
        description = "Account registration, email verification and session tokens"
    ),
    paths(
        auth::register_handler,
        auth::verify_email_handler,
        auth::login_handler,
        auth::refresh_handler,
        auth::logout_handler,
        health::health_check,
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            RefreshTokenRequest,
            UserView,
            UserPayload,
            SessionPayload,
            AccessTokenPayload,
            ErrorBody,
            health::HealthResponse,
        )
    ),
    tags(
        (name = "auth", description = "Account lifecycle and session tokens"),
        (name = "health", description = "Liveness"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_every_auth_route() {
        let doc = openapi();
        for path in [
            "/api/v1/auth/register",
            "/api/v1/auth/verify-email",
            "/api/v1/auth/login",
            "/api/v1/auth/refresh-token",
            "/api/v1/auth/logout",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn test_login_documents_the_status_it_returns() {
        let doc = serde_json::to_value(openapi()).unwrap();
        let responses = &doc["paths"]["/api/v1/auth/login"]["post"]["responses"];

        let credentials_status = crate::error::AppError::InvalidCredentials
            .status()
            .as_u16()
            .to_string();
        assert!(responses[credentials_status.as_str()].is_object());
        assert!(responses["403"].is_object());
        assert!(responses.get("401").is_none());
    }

    #[test]
    fn test_logout_documents_body_token() {
        let doc = serde_json::to_value(openapi()).unwrap();
        assert!(doc["paths"]["/api/v1/auth/logout"]["post"]["requestBody"].is_object());
    }
}
