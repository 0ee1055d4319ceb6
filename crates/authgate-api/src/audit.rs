//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level with the "audit" target, so they
//! can be filtered and routed separately from application logs. Each record
//! carries the serde-tagged JSON rendering of the event.

use authgate_core::{Role, UserId};
use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::info;

/// Where a request came from, for audit and admission purposes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Self {
        Self {
            ip_address: client_ip(headers, peer, trust_forwarded),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    UserRegistered {
        user_id: UserId,
        email: String,
        role: Role,
        #[serde(flatten)]
        client: ClientContext,
    },

    EmailVerified {
        user_id: UserId,
        already_verified: bool,
        #[serde(flatten)]
        client: ClientContext,
    },

    LoginSuccess {
        user_id: UserId,
        email: String,
        #[serde(flatten)]
        client: ClientContext,
    },

    LoginFailure {
        email: String,
        reason: String,
        #[serde(flatten)]
        client: ClientContext,
    },

    TokenRefreshed {
        user_id: UserId,
        #[serde(flatten)]
        client: ClientContext,
    },

    /// An already-spent refresh token was presented again
    RefreshTokenReuse {
        user_id: UserId,
        #[serde(flatten)]
        client: ClientContext,
    },

    Logout {
        user_id: Option<UserId>,
        revoked: bool,
        #[serde(flatten)]
        client: ClientContext,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::UserRegistered { .. } => "User registered",
            AuditEvent::EmailVerified { .. } => "Email verified",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefreshed { .. } => "Token refreshed",
            AuditEvent::RefreshTokenReuse { .. } => "Refresh token reuse detected",
            AuditEvent::Logout { .. } => "User logged out",
        }
    }

    fn client(&self) -> &ClientContext {
        match self {
            AuditEvent::UserRegistered { client, .. }
            | AuditEvent::EmailVerified { client, .. }
            | AuditEvent::LoginSuccess { client, .. }
            | AuditEvent::LoginFailure { client, .. }
            | AuditEvent::TokenRefreshed { client, .. }
            | AuditEvent::RefreshTokenReuse { client, .. }
            | AuditEvent::Logout { client, .. } => client,
        }
    }
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let client = event.client();

    match event {
        AuditEvent::RefreshTokenReuse { user_id, .. } => {
            tracing::warn!(
                target: "audit",
                timestamp = %Utc::now(),
                event = %event_json,
                user_id = %user_id,
                ip_address = ?client.ip_address,
                "{}",
                event.summary()
            );
        }
        _ => {
            info!(
                target: "audit",
                timestamp = %Utc::now(),
                event = %event_json,
                ip_address = ?client.ip_address,
                "{}",
                event.summary()
            );
        }
    }
}

/// Client address of a request.
///
/// Forwarding headers are client-controlled unless a proxy rewrites them, so
/// they are consulted only when `trust_forwarded` is set. Otherwise the
/// socket peer address is the answer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> Option<String> {
    let forwarded = if trust_forwarded {
        extract_ip_address(headers)
    } else {
        None
    };
    forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Extract client IP address from proxy headers
///
/// Checks X-Forwarded-For (first hop), then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip_str = ip_str.trim();
            if !ip_str.is_empty() {
                return Some(ip_str.to_string());
            }
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: UserId(7),
            email: "test@example.com".to_string(),
            client: ClientContext {
                ip_address: Some("192.168.1.1".to_string()),
                user_agent: Some("Mozilla/5.0".to_string()),
            },
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["user_id"], 7);
        assert_eq!(json["ip_address"], "192.168.1.1");
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::RefreshTokenReuse {
            user_id: UserId(1),
            client: ClientContext::default(),
        });
        audit_log(&AuditEvent::Logout {
            user_id: None,
            revoked: false,
            client: ClientContext::default(),
        });
    }

    #[test]
    fn test_extract_ip_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_ip_address(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_client_ip_ignores_forwarded_headers_by_default() {
        let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(
            client_ip(&headers, Some(peer), false).as_deref(),
            Some("192.0.2.10")
        );
        assert_eq!(client_ip(&headers, None, false), None);
    }

    #[test]
    fn test_client_ip_behind_trusted_proxy() {
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            client_ip(&headers, Some(peer), true).as_deref(),
            Some("10.0.0.1")
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        assert_eq!(
            client_ip(&headers, Some(peer), true).as_deref(),
            Some("203.0.113.1")
        );
    }

    #[test]
    fn test_client_context_resolve() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));

        let client = ClientContext::resolve(&headers, None, false);
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(client.ip_address, None);
    }
}
