//! Application state management

use crate::admission::AdmissionGate;
use crate::auth::password::PasswordHasher;
use crate::auth::revocation::{
    InMemoryRefreshTokenRegistry, PgRefreshTokenRegistry, RefreshTokenRegistry,
};
use crate::auth::service::AuthService;
use crate::auth::tokens::TokenService;
use crate::email::{EmailSender, LogEmailSender};
use crate::error::ErrorPolicy;
use anyhow::Context;
use authgate_core::{
    AppConfig, CredentialStore, Environment, InMemoryCredentialStore, PgCredentialStore,
    StoreBackend,
};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Token issuance and verification
    pub tokens: Arc<TokenService>,
    /// Register, verify, login, refresh, logout
    pub auth: AuthService,
    /// Request admission for the auth routes
    pub gate: AdmissionGate,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around an already-built store and allow-list
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RefreshTokenRegistry>,
        email: Arc<dyn EmailSender>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let tokens = Arc::new(TokenService::new(&config.tokens));
        let hasher = PasswordHasher::new(&config.password).context("invalid password hashing parameters")?;
        let auth = AuthService::new(&config, store, registry, tokens.clone(), hasher, email);
        let gate = AdmissionGate::local(&config.admission);

        Ok(Self {
            config,
            tokens,
            auth,
            gate,
            start_time: Instant::now(),
        })
    }

    /// State backed by in-memory stores
    pub fn in_memory(config: AppConfig, email: Arc<dyn EmailSender>) -> anyhow::Result<Self> {
        Self::assemble(
            config,
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryRefreshTokenRegistry::new()),
            email,
        )
    }

    /// State for the configured store backend, creating tables if needed
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        match config.store.backend {
            StoreBackend::Memory => {
                tracing::warn!("using in-memory credential store; data is lost on restart");
                Self::in_memory(config, Arc::new(LogEmailSender))
            }
            StoreBackend::Postgres => {
                let url = config
                    .store
                    .postgres_url
                    .clone()
                    .context("postgres backend selected without DATABASE_URL")?;
                let store = PgCredentialStore::connect(&url, config.store.postgres_pool_size)
                    .await
                    .context("failed to connect credential store")?;
                store
                    .ensure_schema()
                    .await
                    .context("failed to prepare users table")?;

                let registry = PgRefreshTokenRegistry::new(store.pool().clone());
                registry
                    .ensure_schema()
                    .await
                    .context("failed to prepare refresh_tokens table")?;

                tracing::info!("connected to PostgreSQL credential store");
                Self::assemble(
                    config,
                    Arc::new(store),
                    Arc::new(registry),
                    Arc::new(LogEmailSender),
                )
            }
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// The refresh cookie carries `Secure` only in production
    pub fn secure_cookies(&self) -> bool {
        self.config.environment == Environment::Production
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy {
            expose_internal: self.config.is_development(),
        }
    }
}
