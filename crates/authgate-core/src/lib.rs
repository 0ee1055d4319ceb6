//! Authgate Core - Domain models, store contract, and configuration
//!
//! This crate holds everything the authentication service needs that does not
//! depend on HTTP:
//! - User records and roles
//! - The credential store contract and its implementations
//! - Common error types
//! - Configuration management

pub mod config;
pub mod store;

pub use config::{
    AdmissionConfig, AppConfig, ConfigError, Environment, LoggingConfig, PasswordConfig,
    ServerConfig, StoreBackend, StoreConfig, TokenConfig,
};
pub use store::{InMemoryCredentialStore, PgCredentialStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Credential store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with the same email already exists
    #[error("email already registered")]
    Conflict,

    #[error("user not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Roles
// ============================================================================

/// Role assigned to a registered account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

// ============================================================================
// Users
// ============================================================================

/// Store-assigned numeric user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(UserId)
    }
}

/// Lifecycle state of a stored account.
///
/// `Unregistered` has no record, so only the two persisted states appear here.
/// The transition is one-way: a verified account never returns to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    PendingVerification,
    Verified,
}

/// User record as held by the credential store
///
/// `password_hash` is a PHC string and never leaves the service.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn state(&self) -> AccountState {
        if self.email_verified {
            AccountState::Verified
        } else {
            AccountState::PendingVerification
        }
    }
}

/// Fields required to create a user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    /// Already trimmed and lower-cased
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

// ============================================================================
// Store contract
// ============================================================================

/// Narrow contract over the user-record store.
///
/// Each operation is atomic at the single-record level. `create` must enforce
/// email uniqueness itself and report a duplicate as [`StoreError::Conflict`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn create(&self, user: NewUser) -> StoreResult<User>;

    /// Flip `email_verified` to true and bump `updated_at`.
    async fn mark_email_verified(&self, id: UserId) -> StoreResult<User>;
}
