//! Authentication API handlers
//!
//! Thin HTTP adapters over [`AuthService`]: they pull the inputs out of the
//! request, call the service, and move the refresh token between the service
//! and the `refreshToken` cookie. The refresh token never appears in a
//! response body.
//!
//! [`AuthService`]: crate::auth::service::AuthService

use super::{JsonBody, QueryParams};
use crate::audit::ClientContext;
use crate::auth::cookies::{clear_refresh_cookie, extract_refresh_token, refresh_cookie};
use crate::auth::models::{
    AccessTokenPayload, LoginRequest, RefreshTokenRequest, RegisterRequest, SessionPayload,
    UserPayload, UserView, VerifyEmailQuery,
};
use crate::auth::service::SessionGrant;
use crate::auth::tokens::TokenPurpose;
use crate::error::AppError;
use crate::response::ApiResponse;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub const REGISTERED_MESSAGE: &str = "User registered successfully. Please verify your email.";
pub const VERIFIED_MESSAGE: &str = "Email verified successfully";
pub const ALREADY_VERIFIED_MESSAGE: &str = "Email already verified";
pub const LOGGED_IN_MESSAGE: &str = "Logged in successfully";
pub const REFRESHED_MESSAGE: &str = "Token refreshed";
pub const LOGGED_OUT_MESSAGE: &str = "Logged out successfully";

/// Register a new account
///
/// The account starts unverified; a verification link is emailed to the
/// address. Email delivery problems do not fail the request.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered, verification pending", body = UserPayload),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody),
        (status = 429, description = "Too many requests", body = crate::error::ErrorBody),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&state, &headers, connect);
    let user = state.auth.register(request, &client).await?;

    Ok(ApiResponse::new(
        StatusCode::CREATED,
        REGISTERED_MESSAGE,
        UserPayload {
            user: UserView::from(&user),
        },
    ))
}

/// Verify an email address from the emailed link
///
/// Opens a session on success. Following the link again after the account
/// is verified succeeds with a fresh session.
#[utoipa::path(
    get,
    path = "/api/v1/auth/verify-email",
    tag = "auth",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified; refresh token set as cookie", body = SessionPayload),
        (status = 400, description = "Token missing", body = crate::error::ErrorBody),
        (status = 401, description = "Token invalid or expired", body = crate::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
    )
)]
pub async fn verify_email_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    QueryParams(query): QueryParams<VerifyEmailQuery>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&state, &headers, connect);
    let outcome = state
        .auth
        .verify_email(query.token.as_deref(), &client)
        .await?;

    let message = if outcome.already_verified {
        ALREADY_VERIFIED_MESSAGE
    } else {
        VERIFIED_MESSAGE
    };
    session_response(&state, outcome.session, message)
}

/// Login with email and password
///
/// Unknown emails and wrong passwords get the same response.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; refresh token set as cookie", body = SessionPayload),
        (status = 400, description = "Invalid input or invalid credentials", body = crate::error::ErrorBody),
        (status = 403, description = "Email not verified", body = crate::error::ErrorBody),
        (status = 429, description = "Too many requests", body = crate::error::ErrorBody),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&state, &headers, connect);
    let grant = state.auth.login(request, &client).await?;
    session_response(&state, grant, LOGGED_IN_MESSAGE)
}

/// Exchange a refresh token for a new access token
///
/// The refresh token is read from the cookie, or from the JSON body when no
/// cookie is present. It is spent and replaced by a new one in the cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    tag = "auth",
    request_body(content = RefreshTokenRequest, description = "Fallback when the refreshToken cookie is absent"),
    responses(
        (status = 200, description = "Token refreshed; refresh cookie rotated", body = AccessTokenPayload),
        (status = 401, description = "Refresh token missing, invalid or already used", body = crate::error::ErrorBody),
        (status = 403, description = "Email no longer verified", body = crate::error::ErrorBody),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(&state, &headers, connect);
    let token = presented_refresh_token(&headers, &body);
    let grant = state.auth.refresh(token.as_deref(), &client).await?;

    let cookie = issue_cookie(&state, &grant)?;
    Ok((
        [(SET_COOKIE, cookie)],
        ApiResponse::ok(
            REFRESHED_MESSAGE,
            AccessTokenPayload {
                access_token: grant.access_token,
            },
        ),
    ))
}

/// Logout
///
/// Clears the refresh cookie and revokes the refresh token sent as
/// `{"refreshToken": ...}` in the body. The cookie is scoped to the refresh
/// endpoint, so a browser does not send it here; a `Cookie` header that does
/// carry it is honored the same way. Always succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body(content = RefreshTokenRequest, description = "Refresh token to revoke"),
    responses(
        (status = 200, description = "Logged out; refresh cookie cleared"),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> impl IntoResponse {
    let client = client_context(&state, &headers, connect);
    let token = presented_refresh_token(&headers, &body);
    state.auth.logout(token.as_deref(), &client).await;

    (
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies()))],
        ApiResponse::message(StatusCode::OK, LOGGED_OUT_MESSAGE),
    )
}

fn session_response(
    state: &AppState,
    grant: SessionGrant,
    message: &str,
) -> Result<impl IntoResponse, AppError> {
    let cookie = issue_cookie(state, &grant)?;
    Ok((
        [(SET_COOKIE, cookie)],
        ApiResponse::ok(
            message,
            SessionPayload {
                user: UserView::from(&grant.user),
                access_token: grant.access_token,
            },
        ),
    ))
}

fn issue_cookie(state: &AppState, grant: &SessionGrant) -> Result<HeaderValue, AppError> {
    let max_age = state
        .tokens
        .lifetime_secs(TokenPurpose::Refresh)
        .unwrap_or(state.config.tokens.refresh_ttl_secs);

    refresh_cookie(&grant.refresh_token.token, max_age, state.secure_cookies())
        .map_err(|e| AppError::Internal(e.into()))
}

/// Cookie first, then `{"refreshToken": ...}` in the body. A body that is
/// not valid JSON counts as no token.
fn presented_refresh_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    extract_refresh_token(headers).or_else(|| {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<RefreshTokenRequest>(body)
            .ok()
            .and_then(|request| request.refresh_token)
    })
}

fn client_context(
    state: &AppState,
    headers: &HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ClientContext {
    ClientContext::resolve(
        headers,
        connect.map(|ConnectInfo(addr)| addr),
        state.config.server.trust_forwarded_headers,
    )
}
