//! Refresh-token allow-list
//!
//! A refresh token is accepted only while its entry here is live. Rotation
//! consumes the presented entry and registers the new token, so a replayed
//! refresh token fails even before its own expiry. Entries are keyed by the
//! SHA-256 of the token's `jti`; raw identifiers are never stored.

use async_trait::async_trait;
use authgate_core::{StoreError, StoreResult, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Expired in-memory entries are swept once the table grows past this size
const SWEEP_THRESHOLD: usize = 10_000;

/// The PostgreSQL registry deletes expired rows once per this many
/// registrations
const PRUNE_INTERVAL: u64 = 256;

/// Result of presenting a refresh token for rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Entry was live and is now spent
    Consumed(UserId),
    /// Entry exists but was already consumed or revoked
    Reused,
    /// No entry, or the entry has expired
    Unknown,
}

/// Server-side record of refresh tokens that may still be exchanged
#[async_trait]
pub trait RefreshTokenRegistry: Send + Sync {
    /// Record a newly issued refresh token
    async fn register(&self, jti: &str, user_id: UserId, expires_at: DateTime<Utc>)
        -> StoreResult<()>;

    /// Atomically spend a refresh token
    async fn consume(&self, jti: &str) -> StoreResult<ConsumeOutcome>;

    /// Spend a refresh token without rotating it. Returns whether it was live.
    async fn revoke(&self, jti: &str) -> StoreResult<bool>;
}

/// Hex SHA-256 of a token identifier
pub fn fingerprint(jti: &str) -> String {
    format!("{:x}", Sha256::digest(jti.as_bytes()))
}

// ============================================================================
// In-memory registry
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
    spent: bool,
}

/// Process-local allow-list
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryRefreshTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn prune(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, e| e.expires_at > now);
    before - entries.len()
}

#[async_trait]
impl RefreshTokenRegistry for InMemoryRefreshTokenRegistry {
    async fn register(
        &self,
        jti: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if entries.len() >= SWEEP_THRESHOLD {
            prune(&mut entries, Utc::now());
        }
        entries.insert(
            fingerprint(jti),
            Entry {
                user_id,
                expires_at,
                spent: false,
            },
        );
        Ok(())
    }

    async fn consume(&self, jti: &str) -> StoreResult<ConsumeOutcome> {
        let mut entries = self.entries.lock();
        let outcome = match entries.get_mut(&fingerprint(jti)) {
            None => ConsumeOutcome::Unknown,
            Some(entry) if entry.expires_at <= Utc::now() => ConsumeOutcome::Unknown,
            Some(entry) if entry.spent => ConsumeOutcome::Reused,
            Some(entry) => {
                entry.spent = true;
                ConsumeOutcome::Consumed(entry.user_id)
            }
        };
        Ok(outcome)
    }

    async fn revoke(&self, jti: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        Ok(match entries.get_mut(&fingerprint(jti)) {
            Some(entry) if !entry.spent => {
                entry.spent = true;
                true
            }
            _ => false,
        })
    }
}

// ============================================================================
// PostgreSQL registry
// ============================================================================

/// PostgreSQL allow-list sharing the credential store's pool
pub struct PgRefreshTokenRegistry {
    pool: PgPool,
    registrations: AtomicU64,
}

impl PgRefreshTokenRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            registrations: AtomicU64::new(0),
        }
    }

    /// Delete expired rows, returning how many were removed
    pub async fn prune_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;

        Ok(result.rows_affected())
    }

    /// Create the `refresh_tokens` table if it does not exist yet
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                token_hash CHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                consumed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS refresh_tokens_expires_at_idx ON refresh_tokens (expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }
}

fn prune_due(registrations: u64) -> bool {
    registrations % PRUNE_INTERVAL == 0
}

fn backend_error(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl RefreshTokenRegistry for PgRefreshTokenRegistry {
    async fn register(
        &self,
        jti: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(fingerprint(jti))
        .bind(user_id.0)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        if prune_due(self.registrations.fetch_add(1, Ordering::Relaxed)) {
            match self.prune_expired().await {
                Ok(removed) => tracing::debug!(removed, "pruned expired refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "failed to prune expired refresh tokens"),
            }
        }

        Ok(())
    }

    async fn consume(&self, jti: &str) -> StoreResult<ConsumeOutcome> {
        let hash = fingerprint(jti);

        let consumed: Option<(i64,)> = sqlx::query_as(
            "UPDATE refresh_tokens SET consumed_at = NOW() \
             WHERE token_hash = $1 AND consumed_at IS NULL AND expires_at > NOW() \
             RETURNING user_id",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        if let Some((user_id,)) = consumed {
            return Ok(ConsumeOutcome::Consumed(UserId(user_id)));
        }

        let spent: Option<(bool,)> = sqlx::query_as(
            "SELECT consumed_at IS NOT NULL FROM refresh_tokens \
             WHERE token_hash = $1 AND expires_at > NOW()",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(match spent {
            Some((true,)) => ConsumeOutcome::Reused,
            _ => ConsumeOutcome::Unknown,
        })
    }

    async fn revoke(&self, jti: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET consumed_at = NOW() \
             WHERE token_hash = $1 AND consumed_at IS NULL",
        )
        .bind(fingerprint(jti))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::days(7)
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("jti-1");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("jti-1"));
        assert_ne!(a, fingerprint("jti-2"));
        assert!(!a.contains("jti"));
    }

    #[tokio::test]
    async fn test_consume_once_then_reused() {
        let registry = InMemoryRefreshTokenRegistry::new();
        registry.register("a", UserId(1), later()).await.unwrap();

        assert_eq!(
            registry.consume("a").await.unwrap(),
            ConsumeOutcome::Consumed(UserId(1))
        );
        assert_eq!(registry.consume("a").await.unwrap(), ConsumeOutcome::Reused);
    }

    #[tokio::test]
    async fn test_unknown_and_expired_tokens() {
        let registry = InMemoryRefreshTokenRegistry::new();
        assert_eq!(registry.consume("nope").await.unwrap(), ConsumeOutcome::Unknown);

        registry
            .register("old", UserId(1), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(registry.consume("old").await.unwrap(), ConsumeOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_revoke_blocks_later_consume() {
        let registry = InMemoryRefreshTokenRegistry::new();
        registry.register("a", UserId(1), later()).await.unwrap();

        assert!(registry.revoke("a").await.unwrap());
        assert!(!registry.revoke("a").await.unwrap());
        assert_eq!(registry.consume("a").await.unwrap(), ConsumeOutcome::Reused);
    }

    #[tokio::test]
    async fn test_prune_drops_only_expired_entries() {
        let registry = InMemoryRefreshTokenRegistry::new();
        registry
            .register("old", UserId(1), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        registry.register("new", UserId(1), later()).await.unwrap();
        assert_eq!(registry.entries.lock().len(), 2);

        assert_eq!(prune(&mut registry.entries.lock(), Utc::now()), 1);
        assert_eq!(registry.entries.lock().len(), 1);
        assert_eq!(
            registry.consume("new").await.unwrap(),
            ConsumeOutcome::Consumed(UserId(1))
        );
    }

    #[tokio::test]
    async fn test_register_sweeps_past_threshold() {
        let registry = InMemoryRefreshTokenRegistry::new();
        let expired = Utc::now() - Duration::seconds(1);
        for i in 0..SWEEP_THRESHOLD {
            registry
                .register(&format!("old-{i}"), UserId(1), expired)
                .await
                .unwrap();
        }
        assert_eq!(registry.entries.lock().len(), SWEEP_THRESHOLD);

        registry.register("new", UserId(1), later()).await.unwrap();
        assert_eq!(registry.entries.lock().len(), 1);
    }

    #[test]
    fn test_postgres_prune_cadence() {
        assert!(prune_due(0));
        assert!(!prune_due(1));
        assert!(!prune_due(PRUNE_INTERVAL - 1));
        assert!(prune_due(PRUNE_INTERVAL));
    }
}
