//! Token issuance and verification
//!
//! Three disjoint token classes are signed with HMAC-SHA256:
//! - Access: short-lived bearer credential carrying the subject and role
//! - Refresh: long-lived, cookie-transported, rotated on every use
//! - Email verification: proves control of an email address
//!
//! Each class has its own key and lifetime, and every token embeds a `purpose`
//! claim. A token minted for one purpose never verifies as another, even when
//! two purposes share a secret through the configured fallback.

use authgate_core::{Role, TokenConfig, UserId};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Token class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
    EmailVerification,
}

impl TokenPurpose {
    pub const ALL: [TokenPurpose; 3] = [
        TokenPurpose::Access,
        TokenPurpose::Refresh,
        TokenPurpose::EmailVerification,
    ];
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenPurpose::Access => "access",
            TokenPurpose::Refresh => "refresh",
            TokenPurpose::EmailVerification => "email verification",
        })
    }
}

/// Payload carried by a token class in addition to the registered claims
pub trait ClaimSet: Serialize + DeserializeOwned {
    /// Whether this payload shape may be issued under `purpose`
    fn allowed_for(purpose: TokenPurpose) -> bool;
}

/// Access and refresh token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub role: Role,
}

impl ClaimSet for SessionClaims {
    fn allowed_for(purpose: TokenPurpose) -> bool {
        matches!(purpose, TokenPurpose::Access | TokenPurpose::Refresh)
    }
}

/// Email verification token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailVerificationClaims {
    pub email: String,
}

impl ClaimSet for EmailVerificationClaims {
    fn allowed_for(purpose: TokenPurpose) -> bool {
        purpose == TokenPurpose::EmailVerification
    }
}

/// Wire layout of every token
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<C> {
    iss: String,
    sub: String,
    jti: String,
    iat: u64,
    exp: u64,
    purpose: TokenPurpose,
    #[serde(flatten)]
    claims: C,
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Unique token identifier, recorded by the refresh allow-list
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Claims recovered from a token that passed verification
#[derive(Debug, Clone)]
pub struct VerifiedToken<C> {
    pub subject: UserId,
    pub claims: C,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Token errors
///
/// Every verification failure maps to `Invalid`; an expired token and a forged
/// one look the same to the caller.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign {purpose} token: {reason}")]
    Signing {
        purpose: TokenPurpose,
        reason: String,
    },

    #[error("invalid token")]
    Invalid,
}

struct PurposeKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl PurposeKey {
    fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }
}

/// Issues and verifies all three token classes
pub struct TokenService {
    issuer: String,
    access: Option<PurposeKey>,
    refresh: Option<PurposeKey>,
    email_verification: Option<PurposeKey>,
    fallback: Vec<TokenPurpose>,
}

impl TokenService {
    /// Build the service from configuration.
    ///
    /// A purpose without its own secret borrows `jwt_secret` only when
    /// `allow_secret_fallback` is set; each such purpose is logged at WARN and
    /// listed by [`TokenService::fallback_purposes`]. A purpose left with no key
    /// fails every issue and verify call.
    pub fn new(config: &TokenConfig) -> Self {
        let base = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty() && config.allow_secret_fallback);
        let mut fallback = Vec::new();

        let mut resolve = |purpose: TokenPurpose, own: Option<&String>, ttl_secs: u64| {
            match own.map(String::as_str).filter(|s| !s.is_empty()) {
                Some(secret) => Some(PurposeKey::new(secret, ttl_secs)),
                None => match base {
                    Some(secret) => {
                        tracing::warn!(
                            purpose = %purpose,
                            "no dedicated secret configured; falling back to the shared JWT secret"
                        );
                        fallback.push(purpose);
                        Some(PurposeKey::new(secret, ttl_secs))
                    }
                    None => {
                        tracing::warn!(purpose = %purpose, "no signing key configured");
                        None
                    }
                },
            }
        };

        let access = resolve(
            TokenPurpose::Access,
            config.access_secret.as_ref(),
            config.access_ttl_secs,
        );
        let refresh = resolve(
            TokenPurpose::Refresh,
            config.refresh_secret.as_ref(),
            config.refresh_ttl_secs,
        );
        let email_verification = resolve(
            TokenPurpose::EmailVerification,
            config.email_verification_secret.as_ref(),
            config.email_verification_ttl_secs,
        );

        Self {
            issuer: config.issuer.clone(),
            access,
            refresh,
            email_verification,
            fallback,
        }
    }

    /// Purposes signing with the shared base secret
    pub fn fallback_purposes(&self) -> &[TokenPurpose] {
        &self.fallback
    }

    /// Configured lifetime of a token class, if it has a key
    pub fn lifetime_secs(&self, purpose: TokenPurpose) -> Option<u64> {
        self.key(purpose).map(|k| k.ttl_secs)
    }

    fn key(&self, purpose: TokenPurpose) -> Option<&PurposeKey> {
        match purpose {
            TokenPurpose::Access => self.access.as_ref(),
            TokenPurpose::Refresh => self.refresh.as_ref(),
            TokenPurpose::EmailVerification => self.email_verification.as_ref(),
        }
    }

    /// Sign `claims` for `subject` under `purpose`
    pub fn issue<C: ClaimSet>(
        &self,
        purpose: TokenPurpose,
        subject: UserId,
        claims: &C,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(purpose, subject, claims, Utc::now())
    }

    pub(crate) fn issue_at<C: ClaimSet>(
        &self,
        purpose: TokenPurpose,
        subject: UserId,
        claims: &C,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let signing_error = |reason: &str| TokenError::Signing {
            purpose,
            reason: reason.to_string(),
        };

        if !C::allowed_for(purpose) {
            return Err(signing_error("claim shape does not match token purpose"));
        }
        let key = self
            .key(purpose)
            .ok_or_else(|| signing_error("no signing key configured"))?;

        let iat = u64::try_from(now.timestamp()).map_err(|_| signing_error("clock before epoch"))?;
        let exp = iat + key.ttl_secs;
        let jti = Uuid::new_v4().to_string();

        let envelope = Envelope {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            jti: jti.clone(),
            iat,
            exp,
            purpose,
            claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &envelope, &key.encoding)
            .map_err(|e| signing_error(&e.to_string()))?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at: timestamp(exp),
        })
    }

    /// Check signature, expiry, issuer and purpose, then return the claims
    pub fn verify<C: ClaimSet>(
        &self,
        purpose: TokenPurpose,
        token: &str,
    ) -> Result<VerifiedToken<C>, TokenError> {
        if !C::allowed_for(purpose) {
            return Err(TokenError::Invalid);
        }
        let key = self.key(purpose).ok_or(TokenError::Invalid)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let data = decode::<Envelope<C>>(token, &key.decoding, &validation).map_err(|e| {
            tracing::debug!(purpose = %purpose, error = %e, "token rejected");
            TokenError::Invalid
        })?;
        let envelope = data.claims;

        if envelope.purpose != purpose {
            tracing::debug!(
                expected = %purpose,
                actual = %envelope.purpose,
                "token presented for the wrong purpose"
            );
            return Err(TokenError::Invalid);
        }

        let subject = envelope.sub.parse().map_err(|_| TokenError::Invalid)?;

        Ok(VerifiedToken {
            subject,
            claims: envelope.claims,
            jti: envelope.jti,
            expires_at: timestamp(envelope.exp),
        })
    }
}

fn timestamp(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
