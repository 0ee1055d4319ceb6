//! Authentication module
//!
//! - Token issuance and verification for the three token purposes
//! - Password hashing with Argon2
//! - Refresh-token allow-list with rotation and reuse detection
//! - Refresh cookie handling
//! - Optional bearer authentication middleware
//! - Authentication service for the account lifecycle

pub mod cookies;
pub mod middleware;
pub mod models;
pub mod password;
pub mod revocation;
pub mod service;
pub mod tokens;

pub use middleware::{optional_auth_middleware, AuthenticatedUser};
pub use models::{
    AccessTokenPayload, LoginRequest, RefreshTokenRequest, RegisterRequest, SessionPayload,
    UserPayload, UserView, VerifyEmailQuery,
};
pub use password::{PasswordError, PasswordHasher};
pub use revocation::{
    ConsumeOutcome, InMemoryRefreshTokenRegistry, PgRefreshTokenRegistry, RefreshTokenRegistry,
};
pub use service::{AuthService, SessionGrant, VerificationOutcome};
pub use tokens::{
    ClaimSet, EmailVerificationClaims, IssuedToken, SessionClaims, TokenError, TokenPurpose,
    TokenService, VerifiedToken,
};
