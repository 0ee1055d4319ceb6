//! Admission decision oracle
//!
//! The gate hands each request's fingerprint and its role's window rule to a
//! [`DecisionOracle`] and acts on the verdict. [`LocalOracle`] keeps its
//! counters in process; a shared deployment would put another implementation
//! behind the same trait.

use super::shield::Shield;
use super::sliding_window::KeyedSlidingWindow;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// What the oracle knows about a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFingerprint {
    /// Rate-limit key: the caller IP, or "unknown"
    pub client_key: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

/// Sliding-window quota applied to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRule {
    pub limit: u32,
    pub window: Duration,
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Malicious-pattern signal, with the rule that fired
    Shield(&'static str),
    RateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("decision oracle unavailable: {0}")]
    Unavailable(String),

    #[error("decision oracle failed: {0}")]
    Internal(String),
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        request: &RequestFingerprint,
        rule: &WindowRule,
    ) -> Result<Decision, OracleError>;
}

/// In-process oracle: shield patterns first, then the sliding window
#[derive(Debug, Default)]
pub struct LocalOracle {
    shield: Shield,
    window: KeyedSlidingWindow,
}

impl LocalOracle {
    pub fn new(shield: Shield) -> Self {
        Self {
            shield,
            window: KeyedSlidingWindow::new(),
        }
    }
}

#[async_trait]
impl DecisionOracle for LocalOracle {
    async fn decide(
        &self,
        request: &RequestFingerprint,
        rule: &WindowRule,
    ) -> Result<Decision, OracleError> {
        if let Some(rule_name) = self.shield.inspect(
            &request.path,
            request.query.as_deref(),
            request.user_agent.as_deref(),
        ) {
            return Ok(Decision::Deny(DenyReason::Shield(rule_name)));
        }

        if self
            .window
            .try_acquire(&request.client_key, rule.limit, rule.window)
        {
            Ok(Decision::Allow)
        } else {
            Ok(Decision::Deny(DenyReason::RateLimit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(path: &str) -> RequestFingerprint {
        RequestFingerprint {
            client_key: "203.0.113.5".to_string(),
            ip_address: Some("203.0.113.5".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            method: "POST".to_string(),
            path: path.to_string(),
            query: None,
        }
    }

    const RULE: WindowRule = WindowRule {
        limit: 2,
        window: Duration::from_secs(60),
    };

    #[tokio::test]
    async fn test_allows_until_quota_then_denies() {
        let oracle = LocalOracle::default();
        let request = fingerprint("/api/v1/auth/login");

        assert_eq!(oracle.decide(&request, &RULE).await.unwrap(), Decision::Allow);
        assert_eq!(oracle.decide(&request, &RULE).await.unwrap(), Decision::Allow);
        assert_eq!(
            oracle.decide(&request, &RULE).await.unwrap(),
            Decision::Deny(DenyReason::RateLimit)
        );
    }

    #[tokio::test]
    async fn test_shield_takes_precedence_and_spends_no_quota() {
        let oracle = LocalOracle::default();

        let verdict = oracle
            .decide(&fingerprint("/api/v1/auth/../admin"), &RULE)
            .await
            .unwrap();
        assert_eq!(verdict, Decision::Deny(DenyReason::Shield("path_traversal")));

        let clean = fingerprint("/api/v1/auth/login");
        assert_eq!(oracle.decide(&clean, &RULE).await.unwrap(), Decision::Allow);
        assert_eq!(oracle.decide(&clean, &RULE).await.unwrap(), Decision::Allow);
    }
}
