//! Request admission gate
//!
//! Per request: resolve the caller's role (authenticated principal, else
//! `guest`), pick that role's quota, ask the decision oracle, and act on the
//! verdict. The gate fails closed: when no decision can be made the request is
//! refused, never passed through.

pub mod oracle;
pub mod shield;
pub mod sliding_window;

pub use oracle::{
    Decision, DecisionOracle, DenyReason, LocalOracle, OracleError, RequestFingerprint, WindowRule,
};
pub use shield::Shield;
pub use sliding_window::KeyedSlidingWindow;

use crate::audit::{client_ip, extract_user_agent};
use crate::auth::middleware::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;
use authgate_core::AdmissionConfig;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Role of callers without an authenticated principal
pub const GUEST_ROLE: &str = "guest";

pub const SHIELD_MESSAGE: &str = "Request blocked by security policy";

/// Request admission gate
pub struct AdmissionGate {
    oracle: Arc<dyn DecisionOracle>,
    quotas: BTreeMap<String, u32>,
    window: Duration,
    oracle_timeout: Duration,
}

impl AdmissionGate {
    pub fn new(config: &AdmissionConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            oracle,
            quotas: config.quotas.clone(),
            window: config.window(),
            oracle_timeout: config.oracle_timeout(),
        }
    }

    /// Gate backed by the in-process oracle
    pub fn local(config: &AdmissionConfig) -> Self {
        Self::new(
            config,
            Arc::new(LocalOracle::new(Shield::new(config.shield_enabled))),
        )
    }

    /// Quota for a role; roles missing from the table get none
    pub fn quota_for(&self, role: &str) -> u32 {
        self.quotas.get(role).copied().unwrap_or(0)
    }

    /// Decide whether a request may proceed
    pub async fn admit(&self, request: &RequestFingerprint, role: &str) -> Result<(), AppError> {
        let rule = WindowRule {
            limit: self.quota_for(role),
            window: self.window,
        };

        let decision =
            match tokio::time::timeout(self.oracle_timeout, self.oracle.decide(request, &rule))
                .await
            {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => {
                    tracing::error!(path = %request.path, error = %e, "admission check failed");
                    return Err(AppError::Internal(e.into()));
                }
                Err(_) => {
                    tracing::error!(
                        path = %request.path,
                        timeout_ms = self.oracle_timeout.as_millis() as u64,
                        "admission check timed out"
                    );
                    return Err(AppError::Timeout(
                        "Security check unavailable, please retry".to_string(),
                    ));
                }
            };

        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(DenyReason::Shield(shield_rule)) => {
                tracing::warn!(
                    ip = ?request.ip_address,
                    user_agent = ?request.user_agent,
                    path = %request.path,
                    method = %request.method,
                    shield_rule,
                    "Shield blocked request"
                );
                Err(AppError::Forbidden(SHIELD_MESSAGE.to_string()))
            }
            Decision::Deny(DenyReason::RateLimit) => {
                tracing::warn!(
                    ip = ?request.ip_address,
                    user_agent = ?request.user_agent,
                    path = %request.path,
                    role,
                    limit = rule.limit,
                    "Rate limit exceeded"
                );
                Err(AppError::RateLimited)
            }
        }
    }
}

/// Role of the request's principal, or `guest`
pub fn resolve_role(principal: Option<&AuthenticatedUser>) -> &'static str {
    principal.map_or(GUEST_ROLE, |p| p.role.as_str())
}

/// Build the oracle's view of a request.
///
/// The client key is the socket peer address unless forwarding headers are
/// trusted.
pub fn fingerprint(
    request: &Request<Body>,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> RequestFingerprint {
    let headers = request.headers();
    let ip_address = client_ip(headers, peer, trust_forwarded);

    RequestFingerprint {
        client_key: ip_address.clone().unwrap_or_else(|| "unknown".to_string()),
        ip_address,
        user_agent: extract_user_agent(headers),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
    }
}

/// Admission middleware; must run after principal resolution
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let role = resolve_role(request.extensions().get::<AuthenticatedUser>());
    let peer = connect.map(|ConnectInfo(addr)| addr);
    let fingerprint = fingerprint(
        &request,
        peer,
        state.config.server.trust_forwarded_headers,
    );

    match state.gate.admit(&fingerprint, role).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use authgate_core::{Role, UserId};
    use proptest::prelude::*;

    fn request_from(ip: &str) -> RequestFingerprint {
        RequestFingerprint {
            client_key: ip.to_string(),
            ip_address: Some(ip.to_string()),
            user_agent: None,
            method: "POST".to_string(),
            path: "/api/v1/auth/login".to_string(),
            query: None,
        }
    }

    fn forwarded_request(forwarded_for: &str) -> Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/auth/login?next=home")
            .header("x-forwarded-for", forwarded_for)
            .header("user-agent", "curl/8.0")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_fingerprint_keys_on_peer_address() {
        let peer: SocketAddr = "192.0.2.20:40000".parse().unwrap();

        let a = fingerprint(&forwarded_request("10.0.0.1"), Some(peer), false);
        let b = fingerprint(&forwarded_request("10.0.0.2"), Some(peer), false);
        assert_eq!(a.client_key, "192.0.2.20");
        assert_eq!(a.client_key, b.client_key);
        assert_eq!(a.path, "/api/v1/auth/login");
        assert_eq!(a.query.as_deref(), Some("next=home"));
        assert_eq!(a.user_agent.as_deref(), Some("curl/8.0"));

        let unknown = fingerprint(&forwarded_request("10.0.0.3"), None, false);
        assert_eq!(unknown.client_key, "unknown");
        assert_eq!(unknown.ip_address, None);
    }

    #[test]
    fn test_fingerprint_trusts_proxy_headers_when_enabled() {
        let proxy: SocketAddr = "10.1.1.1:443".parse().unwrap();
        let request = fingerprint(&forwarded_request("203.0.113.9, 10.1.1.1"), Some(proxy), true);
        assert_eq!(request.client_key, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_rotating_forwarded_header_does_not_reset_quota() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        let peer: SocketAddr = "192.0.2.30:40000".parse().unwrap();

        for i in 0..5 {
            let request = fingerprint(&forwarded_request(&format!("10.0.0.{i}")), Some(peer), false);
            assert!(gate.admit(&request, "guest").await.is_ok());
        }
        let request = fingerprint(&forwarded_request("10.0.0.99"), Some(peer), false);
        assert!(matches!(
            gate.admit(&request, "guest").await,
            Err(AppError::RateLimited)
        ));
    }

    #[test]
    fn test_default_quotas() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        assert_eq!(gate.quota_for("admin"), 20);
        assert_eq!(gate.quota_for("user"), 10);
        assert_eq!(gate.quota_for("guest"), 5);
        assert_eq!(gate.quota_for("superuser"), 0);
    }

    #[test]
    fn test_resolve_role() {
        assert_eq!(resolve_role(None), "guest");
        let admin = AuthenticatedUser {
            user_id: UserId(1),
            role: Role::Admin,
        };
        assert_eq!(resolve_role(Some(&admin)), "admin");
    }

    #[tokio::test]
    async fn test_guest_sixth_request_is_rate_limited() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        let request = request_from("198.51.100.7");

        for _ in 0..5 {
            assert!(gate.admit(&request, "guest").await.is_ok());
        }
        let err = gate.admit(&request, "guest").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited));
    }

    #[tokio::test]
    async fn test_admin_gets_twenty() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        let request = request_from("198.51.100.8");

        for _ in 0..20 {
            assert!(gate.admit(&request, "admin").await.is_ok());
        }
        assert!(gate.admit(&request, "admin").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_role_is_denied() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        let err = gate
            .admit(&request_from("198.51.100.9"), "auditor")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited));
    }

    #[tokio::test]
    async fn test_shield_denial_is_forbidden() {
        let gate = AdmissionGate::local(&AdmissionConfig::default());
        let mut request = request_from("198.51.100.10");
        request.user_agent = Some("nikto/2.5".to_string());

        let err = gate.admit(&request, "guest").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == SHIELD_MESSAGE));
    }

    struct BrokenOracle;

    #[async_trait]
    impl DecisionOracle for BrokenOracle {
        async fn decide(
            &self,
            _: &RequestFingerprint,
            _: &WindowRule,
        ) -> Result<Decision, OracleError> {
            Err(OracleError::Unavailable("connection refused".to_string()))
        }
    }

    struct HangingOracle;

    #[async_trait]
    impl DecisionOracle for HangingOracle {
        async fn decide(
            &self,
            _: &RequestFingerprint,
            _: &WindowRule,
        ) -> Result<Decision, OracleError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Decision::Allow)
        }
    }

    #[tokio::test]
    async fn test_oracle_failure_fails_closed() {
        let gate = AdmissionGate::new(&AdmissionConfig::default(), Arc::new(BrokenOracle));
        let err = gate
            .admit(&request_from("198.51.100.11"), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_oracle_timeout_fails_closed() {
        let config = AdmissionConfig {
            oracle_timeout_ms: 20,
            ..Default::default()
        };
        let gate = AdmissionGate::new(&config, Arc::new(HangingOracle));
        let err = gate
            .admit(&request_from("198.51.100.12"), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    proptest! {
        #[test]
        fn prop_unlisted_roles_get_zero_quota(role in "[a-z]{1,12}") {
            let gate = AdmissionGate::local(&AdmissionConfig::default());
            prop_assume!(!["admin", "user", "guest"].contains(&role.as_str()));
            prop_assert_eq!(gate.quota_for(&role), 0);
        }
    }
}
