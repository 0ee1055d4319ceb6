//! Refresh-token cookie and bearer header handling

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// The cookie is only ever sent back to the refresh endpoint
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth/refresh-token";

/// Build the `Set-Cookie` value carrying a refresh token.
///
/// `max_age_secs` is the refresh token's own lifetime, so cookie and token
/// expire together.
pub fn refresh_cookie(
    token: &str,
    max_age_secs: u64,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build the `Set-Cookie` value that removes the refresh cookie
pub fn clear_refresh_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "refreshToken=; Path=/api/v1/auth/refresh-token; HttpOnly; SameSite=Strict; Max-Age=0; Secure",
        )
    } else {
        HeaderValue::from_static(
            "refreshToken=; Path=/api/v1/auth/refresh-token; HttpOnly; SameSite=Strict; Max-Age=0",
        )
    }
}

/// Read the refresh token from the request's `Cookie` headers
pub fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == REFRESH_COOKIE_NAME && !val.trim().is_empty())
                .then(|| val.trim().to_string())
        })
}

/// Read a bearer token from the `Authorization` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
