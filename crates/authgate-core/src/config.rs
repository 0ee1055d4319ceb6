//! Authgate Configuration Management
//!
//! Configuration is assembled once at process start from defaults, an optional
//! TOML file, and environment variables (env takes precedence). The resulting
//! [`AppConfig`] is immutable and handed to the services that need it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment (default: production). Development must be
    /// selected explicitly and is the only mode that exposes internal error
    /// detail to callers.
    pub environment: Environment,

    /// Server configuration
    pub server: ServerConfig,

    /// Token signing keys and lifetimes
    pub tokens: TokenConfig,

    /// Password hashing cost
    pub password: PasswordConfig,

    /// Request admission (rate limiting and shield)
    pub admission: AdmissionConfig,

    /// Credential store selection
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Merge with process environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// `with_env_override` calls this with `std::env::var`;
    /// tests pass a map instead of mutating the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("APP_ENV") {
            self.environment = env.parse()?;
        }

        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "API_PORT".to_string(),
                value: port,
            })?;
        }
        if let Some(url) = lookup("APP_BASE_URL") {
            self.server.public_base_url = url;
        }
        if let Some(trust) = lookup("TRUST_FORWARDED_HEADERS") {
            self.server.trust_forwarded_headers = parse_flag(&trust);
        }

        // Token secrets
        if let Some(secret) = lookup("JWT_SECRET") {
            self.tokens.jwt_secret = Some(secret);
        }
        if let Some(secret) = lookup("ACCESS_TOKEN_SECRET") {
            self.tokens.access_secret = Some(secret);
        }
        if let Some(secret) = lookup("REFRESH_TOKEN_SECRET") {
            self.tokens.refresh_secret = Some(secret);
        }
        if let Some(secret) = lookup("EMAIL_VERIFICATION_SECRET") {
            self.tokens.email_verification_secret = Some(secret);
        }

        // Token lifetimes
        if let Some(value) = lookup("ACCESS_TOKEN_EXPIRY") {
            self.tokens.access_ttl_secs = parse_lifetime("ACCESS_TOKEN_EXPIRY", &value)?;
        }
        if let Some(value) = lookup("REFRESH_TOKEN_EXPIRY") {
            self.tokens.refresh_ttl_secs = parse_lifetime("REFRESH_TOKEN_EXPIRY", &value)?;
        }
        if let Some(value) = lookup("EMAIL_VERIFICATION_EXPIRY") {
            self.tokens.email_verification_ttl_secs =
                parse_lifetime("EMAIL_VERIFICATION_EXPIRY", &value)?;
        }

        // Store
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.backend = StoreBackend::Postgres;
            self.store.postgres_url = Some(url);
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = parse_flag(&json);
        }

        Ok(self)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, ttl) in [
            ("tokens.access_ttl_secs", self.tokens.access_ttl_secs),
            ("tokens.refresh_ttl_secs", self.tokens.refresh_ttl_secs),
            (
                "tokens.email_verification_ttl_secs",
                self.tokens.email_verification_ttl_secs,
            ),
            ("admission.window_secs", self.admission.window_secs),
        ] {
            if ttl == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        // Outside tests every token purpose needs a key
        if self.environment != Environment::Test {
            let tokens = &self.tokens;
            let fallback = if tokens.allow_secret_fallback {
                tokens.jwt_secret.as_ref()
            } else {
                None
            };
            for (name, secret) in [
                ("ACCESS_TOKEN_SECRET", tokens.access_secret.as_ref()),
                ("REFRESH_TOKEN_SECRET", tokens.refresh_secret.as_ref()),
                (
                    "EMAIL_VERIFICATION_SECRET",
                    tokens.email_verification_secret.as_ref(),
                ),
            ] {
                let own = secret.filter(|s| !s.is_empty());
                if own.or(fallback).map_or(true, |s| s.is_empty()) {
                    return Err(ConfigError::MissingRequired(name.to_string()));
                }
            }
        }

        // Every built-in role needs an explicit quota, zero included
        for role in BUILTIN_ROLES {
            if !self.admission.quotas.contains_key(role) {
                return Err(ConfigError::MissingRequired(format!(
                    "admission.quotas.{role}"
                )));
            }
        }

        if self.store.backend == StoreBackend::Postgres && self.store.postgres_url.is_none() {
            return Err(ConfigError::MissingRequired("DATABASE_URL".to_string()));
        }

        Ok(())
    }

    /// Whether internal error detail may be returned to callers
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    #[default]
    Production,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                key: "APP_ENV".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Base URL used when building links sent to users
    pub public_base_url: String,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a reverse proxy that overwrites these headers;
    /// otherwise the socket peer address is used.
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_base_url: "http://localhost:3000".to_string(),
            trust_forwarded_headers: false,
        }
    }
}

/// Token signing configuration
///
/// Each purpose has its own secret. When a purpose-specific secret is absent
/// and `allow_secret_fallback` is set, `jwt_secret` is used instead. That
/// weakens isolation between token classes, so the token service logs every
/// purpose that falls back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Shared base secret
    pub jwt_secret: Option<String>,
    pub access_secret: Option<String>,
    pub refresh_secret: Option<String>,
    pub email_verification_secret: Option<String>,

    /// Use `jwt_secret` for purposes without their own secret
    pub allow_secret_fallback: bool,

    /// Access token lifetime (default: 15 minutes)
    pub access_ttl_secs: u64,

    /// Refresh token lifetime, also the refresh cookie max-age (default: 7 days)
    pub refresh_ttl_secs: u64,

    /// Email verification token lifetime (default: 1 day)
    pub email_verification_ttl_secs: u64,

    /// Token issuer identifier
    pub issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_secret: None,
            refresh_secret: None,
            email_verification_secret: None,
            allow_secret_fallback: true,
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            email_verification_ttl_secs: 24 * 60 * 60,
            issuer: "authgate".to_string(),
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 19456 = 19 MiB)
    pub memory_cost: u32,
    /// Iterations (default: 2)
    pub time_cost: u32,
    /// Lanes (default: 1)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl PasswordConfig {
    /// Minimum-cost parameters for tests
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Admission gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Sliding window length in seconds
    pub window_secs: u64,

    /// Requests allowed per window, keyed by role name.
    /// A table given in a file replaces the defaults and must list every
    /// built-in role; other roles missing from it get a quota of zero.
    pub quotas: BTreeMap<String, u32>,

    /// Upper bound on a single oracle decision
    pub oracle_timeout_ms: u64,

    /// Enable the malicious-pattern shield
    pub shield_enabled: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let quotas = [("admin", 20), ("user", 10), ("guest", 5)]
            .into_iter()
            .map(|(role, quota)| (role.to_string(), quota))
            .collect();

        Self {
            window_secs: 60,
            quotas,
            oracle_timeout_ms: 2000,
            shield_enabled: true,
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

/// Which credential store backs the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Credential store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// PostgreSQL connection URL
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub postgres_pool_size: u32,

    /// Upper bound on a single store call
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            postgres_url: None,
            postgres_pool_size: 10,
            timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "authgate_api=info,tower_http=info".to_string(),
            json_format: false,
        }
    }
}

/// Roles the admission quota table must cover
pub const BUILTIN_ROLES: [&str; 3] = ["admin", "user", "guest"];

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Parse a lifetime such as `15m`, `7d`, `1h`, `90s` or a bare number of seconds
pub fn parse_lifetime(key: &str, value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let (digits, unit) = match trimmed.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => trimmed.split_at(idx),
        None => (trimmed, "s"),
    };

    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    amount.checked_mul(multiplier).ok_or_else(invalid)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
