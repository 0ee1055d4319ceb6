//! Authentication service layer
//!
//! Implements register, verify-email, login, refresh and logout on top of the
//! credential store, the token service and the refresh-token allow-list.
//! An account moves `PendingVerification -> Verified` exactly once; session
//! tokens are only ever granted to verified accounts.

use super::models::{LoginRequest, RegisterRequest};
use super::password::PasswordHasher;
use super::revocation::{ConsumeOutcome, RefreshTokenRegistry};
use super::tokens::{
    EmailVerificationClaims, IssuedToken, SessionClaims, TokenPurpose, TokenService,
};
use crate::audit::{audit_log, AuditEvent, ClientContext};
use crate::email::{EmailSender, VerificationEmail};
use crate::error::AppError;
use authgate_core::{
    AccountState, AppConfig, CredentialStore, NewUser, StoreError, StoreResult, User,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const CONFLICT_MESSAGE: &str = "User with this email already exists";
const USER_NOT_FOUND: &str = "User not found";
const VERIFY_BEFORE_LOGIN: &str = "Please verify your email before logging in";
const VERIFY_BEFORE_REFRESH: &str = "Please verify your email";
const REFRESH_TOKEN_MISSING: &str = "Refresh token missing";

/// Tokens granted to a verified account
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub user: User,
    pub access_token: String,
    /// Delivered only through the refresh cookie
    pub refresh_token: IssuedToken,
}

/// Result of a verify-email call
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub session: SessionGrant,
    /// The account was verified before this call
    pub already_verified: bool,
}

/// Authentication service
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RefreshTokenRegistry>,
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    email: Arc<dyn EmailSender>,
    public_base_url: String,
    store_timeout: Duration,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RefreshTokenRegistry>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            store,
            registry,
            tokens,
            hasher,
            email,
            public_base_url: config.server.public_base_url.clone(),
            store_timeout: config.store.timeout(),
        }
    }

    /// Register a new account in `PendingVerification` and send its
    /// verification link.
    ///
    /// Email delivery failure does not fail the registration; the account
    /// simply stays pending.
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientContext,
    ) -> Result<User, AppError> {
        let registration = request.into_registration().map_err(AppError::Validation)?;

        // Fast path only; the store's uniqueness constraint is authoritative
        if self
            .bounded("user lookup", self.store.find_by_email(&registration.email))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(CONFLICT_MESSAGE.to_string()));
        }

        let password_hash = self
            .hasher
            .hash(&registration.password)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let user = self
            .bounded(
                "user insert",
                self.store.create(NewUser {
                    name: registration.name,
                    email: registration.email,
                    password_hash,
                    role: registration.role,
                }),
            )
            .await?;

        let verification = self
            .tokens
            .issue(
                TokenPurpose::EmailVerification,
                user.id,
                &EmailVerificationClaims {
                    email: user.email.clone(),
                },
            )
            .map_err(|e| AppError::Internal(e.into()))?;

        self.send_verification(&user, &verification.token).await;

        audit_log(&AuditEvent::UserRegistered {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            client: client.clone(),
        });

        Ok(user)
    }

    async fn send_verification(&self, user: &User, token: &str) {
        let message =
            match VerificationEmail::new(&self.public_base_url, &user.email, &user.name, token) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(user_id = %user.id, error = %e, "failed to build verification email");
                    return;
                }
            };

        if let Err(e) = self.email.send_verification(&message).await {
            tracing::error!(user_id = %user.id, error = %e, "failed to send verification email");
        }
    }

    /// Verify an email address and open a session.
    ///
    /// Replaying a valid link after verification succeeds again without
    /// touching the store.
    pub async fn verify_email(
        &self,
        token: Option<&str>,
        client: &ClientContext,
    ) -> Result<VerificationOutcome, AppError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::validation("token is required"))?;

        let verified = self
            .tokens
            .verify::<EmailVerificationClaims>(TokenPurpose::EmailVerification, token)
            .map_err(|_| AppError::unauthorized())?;

        let user = self
            .bounded("user lookup", self.store.find_by_id(verified.subject))
            .await?
            .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.to_string()))?;

        let (user, already_verified) = match user.state() {
            AccountState::Verified => (user, true),
            AccountState::PendingVerification => {
                let user = self
                    .bounded("email verification", self.store.mark_email_verified(user.id))
                    .await?;
                (user, false)
            }
        };

        audit_log(&AuditEvent::EmailVerified {
            user_id: user.id,
            already_verified,
            client: client.clone(),
        });

        let session = self.open_session(user).await?;
        Ok(VerificationOutcome {
            session,
            already_verified,
        })
    }

    /// Exchange email and password for a session
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientContext,
    ) -> Result<SessionGrant, AppError> {
        let credentials = request.into_credentials().map_err(AppError::Validation)?;

        let Some(user) = self
            .bounded("user lookup", self.store.find_by_email(&credentials.email))
            .await?
        else {
            self.hasher.verify_dummy(&credentials.password).await;
            self.login_failed(&credentials.email, "unknown email", client);
            return Err(AppError::InvalidCredentials);
        };

        let password_matches = self
            .hasher
            .verify(&credentials.password, &user.password_hash)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        if user.state() == AccountState::PendingVerification {
            self.login_failed(&user.email, "email not verified", client);
            return Err(AppError::Forbidden(VERIFY_BEFORE_LOGIN.to_string()));
        }

        if !password_matches {
            self.login_failed(&user.email, "wrong password", client);
            return Err(AppError::InvalidCredentials);
        }

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            client: client.clone(),
        });

        self.open_session(user).await
    }

    fn login_failed(&self, email: &str, reason: &str, client: &ClientContext) {
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            reason: reason.to_string(),
            client: client.clone(),
        });
    }

    /// Rotate a refresh token into a new access and refresh token.
    ///
    /// The presented token is spent; presenting it again is rejected and
    /// audited as reuse. The role is re-read from the store.
    pub async fn refresh(
        &self,
        token: Option<&str>,
        client: &ClientContext,
    ) -> Result<SessionGrant, AppError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized(REFRESH_TOKEN_MISSING.to_string()))?;

        let verified = self
            .tokens
            .verify::<SessionClaims>(TokenPurpose::Refresh, token)
            .map_err(|_| AppError::unauthorized())?;

        match self
            .bounded("refresh token lookup", self.registry.consume(&verified.jti))
            .await?
        {
            ConsumeOutcome::Consumed(owner) if owner == verified.subject => {}
            ConsumeOutcome::Reused => {
                audit_log(&AuditEvent::RefreshTokenReuse {
                    user_id: verified.subject,
                    client: client.clone(),
                });
                return Err(AppError::unauthorized());
            }
            ConsumeOutcome::Consumed(_) | ConsumeOutcome::Unknown => {
                return Err(AppError::unauthorized());
            }
        }

        let user = self
            .bounded("user lookup", self.store.find_by_id(verified.subject))
            .await?
            .ok_or_else(AppError::unauthorized)?;

        if user.state() == AccountState::PendingVerification {
            return Err(AppError::Forbidden(VERIFY_BEFORE_REFRESH.to_string()));
        }

        audit_log(&AuditEvent::TokenRefreshed {
            user_id: user.id,
            client: client.clone(),
        });

        self.open_session(user).await
    }

    /// Revoke the presented refresh token, if any.
    ///
    /// Never fails: the caller clears the cookie regardless.
    pub async fn logout(&self, token: Option<&str>, client: &ClientContext) {
        let verified = token.and_then(|t| {
            self.tokens
                .verify::<SessionClaims>(TokenPurpose::Refresh, t)
                .ok()
        });

        let mut revoked = false;
        if let Some(verified) = &verified {
            match self
                .bounded("refresh token revocation", self.registry.revoke(&verified.jti))
                .await
            {
                Ok(live) => revoked = live,
                Err(e) => {
                    tracing::warn!(user_id = %verified.subject, error = %e, "failed to revoke refresh token on logout");
                }
            }
        }

        audit_log(&AuditEvent::Logout {
            user_id: verified.map(|v| v.subject),
            revoked,
            client: client.clone(),
        });
    }

    /// Issue an access and a refresh token and record the latter
    async fn open_session(&self, user: User) -> Result<SessionGrant, AppError> {
        let claims = SessionClaims { role: user.role };

        let access = self
            .tokens
            .issue(TokenPurpose::Access, user.id, &claims)
            .map_err(|e| AppError::Internal(e.into()))?;
        let refresh = self
            .tokens
            .issue(TokenPurpose::Refresh, user.id, &claims)
            .map_err(|e| AppError::Internal(e.into()))?;

        self.bounded(
            "refresh token registration",
            self.registry
                .register(&refresh.jti, user.id, refresh.expires_at),
        )
        .await?;

        Ok(SessionGrant {
            user,
            access_token: access.token,
            refresh_token: refresh,
        })
    }

    /// Run a store call under the configured deadline
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(|e| store_error(operation, e)),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.store_timeout.as_millis() as u64, "store call timed out");
                Err(AppError::Timeout(
                    "Service temporarily unavailable, please retry".to_string(),
                ))
            }
        }
    }
}

fn store_error(operation: &'static str, err: StoreError) -> AppError {
    match err {
        StoreError::Conflict => AppError::Conflict(CONFLICT_MESSAGE.to_string()),
        StoreError::NotFound => AppError::NotFound(USER_NOT_FOUND.to_string()),
        StoreError::Backend(msg) => AppError::Internal(anyhow::anyhow!("{operation} failed: {msg}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::revocation::InMemoryRefreshTokenRegistry;
    use crate::email::{EmailError, MemoryOutbox};
    use async_trait::async_trait;
    use authgate_core::{
        InMemoryCredentialStore, PasswordConfig, Role, TokenConfig, UserId,
    };
    use chrono::Utc;

    struct Harness {
        service: AuthService,
        store: Arc<InMemoryCredentialStore>,
        outbox: MemoryOutbox,
    }

    fn config() -> AppConfig {
        AppConfig {
            tokens: TokenConfig {
                access_secret: Some("access".to_string()),
                refresh_secret: Some("refresh".to_string()),
                email_verification_secret: Some("email".to_string()),
                ..Default::default()
            },
            password: PasswordConfig::insecure_for_tests(),
            ..Default::default()
        }
    }

    fn harness_with(config: AppConfig, email: Option<Arc<dyn EmailSender>>) -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        let outbox = MemoryOutbox::new();
        let email = email.unwrap_or_else(|| Arc::new(outbox.clone()));
        let service = AuthService::new(
            &config,
            store.clone(),
            Arc::new(InMemoryRefreshTokenRegistry::new()),
            Arc::new(TokenService::new(&config.tokens)),
            PasswordHasher::new(&config.password).unwrap(),
            email,
        );
        Harness {
            service,
            store,
            outbox,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), None)
    }

    fn ann() -> RegisterRequest {
        RegisterRequest {
            name: Some("Ann".to_string()),
            email: Some("ann@x.com".to_string()),
            role: None,
            password: Some("password1".to_string()),
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    async fn registered_and_verified(h: &Harness) -> SessionGrant {
        let client = ClientContext::default();
        h.service.register(ann(), &client).await.unwrap();
        let token = h.outbox.last_token_for("ann@x.com").unwrap();
        h.service
            .verify_email(Some(&token), &client)
            .await
            .unwrap()
            .session
    }

    #[tokio::test]
    async fn test_register_creates_pending_account_and_sends_link() {
        let h = harness();
        let user = h
            .service
            .register(ann(), &ClientContext::default())
            .await
            .unwrap();

        assert_eq!(user.id, UserId(1));
        assert_eq!(user.role, Role::User);
        assert!(!user.email_verified);
        assert!(user.password_hash.starts_with("$argon2id$"));

        let messages = h.outbox.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].link.contains("/api/v1/auth/verify-email?token="));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let h = harness();
        let client = ClientContext::default();
        h.service.register(ann(), &client).await.unwrap();

        let mut again = ann();
        again.email = Some("  ANN@x.com ".to_string());
        let err = h.service.register(again, &client).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_survives_email_failure() {
        struct Broken;

        #[async_trait]
        impl EmailSender for Broken {
            async fn send_verification(&self, _: &VerificationEmail) -> Result<(), EmailError> {
                Err(EmailError::Delivery("smtp down".to_string()))
            }
        }

        let h = harness_with(config(), Some(Arc::new(Broken)));
        let user = h
            .service
            .register(ann(), &ClientContext::default())
            .await
            .unwrap();
        assert!(!user.email_verified);
    }

    #[tokio::test]
    async fn test_login_before_verification_is_forbidden_for_any_password() {
        let h = harness();
        let client = ClientContext::default();
        h.service.register(ann(), &client).await.unwrap();

        for password in ["password1", "wrongpass"] {
            let err = h
                .service
                .login(login("ann@x.com", password), &client)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
    }

    #[tokio::test]
    async fn test_verify_email_is_idempotent() {
        let h = harness();
        let client = ClientContext::default();
        h.service.register(ann(), &client).await.unwrap();
        let token = h.outbox.last_token_for("ann@x.com").unwrap();

        let first = h.service.verify_email(Some(&token), &client).await.unwrap();
        assert!(!first.already_verified);
        assert!(first.session.user.email_verified);

        let second = h.service.verify_email(Some(&token), &client).await.unwrap();
        assert!(second.already_verified);
        assert!(second.session.user.email_verified);
        assert_ne!(
            first.session.refresh_token.jti,
            second.session.refresh_token.jti
        );
    }

    #[tokio::test]
    async fn test_verify_email_rejects_bad_tokens() {
        let h = harness();
        let client = ClientContext::default();

        let missing = h.service.verify_email(None, &client).await.unwrap_err();
        assert!(matches!(missing, AppError::Validation(_)));

        let forged = h
            .service
            .verify_email(Some("not.a.token"), &client)
            .await
            .unwrap_err();
        assert!(matches!(forged, AppError::Unauthorized(_)));
    }

    async fn assert_verification_rejected(h: &Harness, user: &User, token: &str) {
        let err = h
            .service
            .verify_email(Some(token), &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let stored = h.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), AccountState::PendingVerification);
        assert_eq!(stored.updated_at, user.updated_at);
    }

    #[tokio::test]
    async fn test_expired_verification_token_leaves_account_pending() {
        let h = harness();
        let user = h
            .service
            .register(ann(), &ClientContext::default())
            .await
            .unwrap();

        let expired = TokenService::new(&config().tokens)
            .issue_at(
                TokenPurpose::EmailVerification,
                user.id,
                &EmailVerificationClaims {
                    email: user.email.clone(),
                },
                Utc::now() - chrono::Duration::days(2),
            )
            .unwrap();

        assert_verification_rejected(&h, &user, &expired.token).await;
    }

    #[tokio::test]
    async fn test_foreign_key_verification_token_leaves_account_pending() {
        let h = harness();
        let user = h
            .service
            .register(ann(), &ClientContext::default())
            .await
            .unwrap();

        let mut foreign = config();
        foreign.tokens.email_verification_secret = Some("someone-else".to_string());
        let forged = TokenService::new(&foreign.tokens)
            .issue(
                TokenPurpose::EmailVerification,
                user.id,
                &EmailVerificationClaims {
                    email: user.email.clone(),
                },
            )
            .unwrap();

        assert_verification_rejected(&h, &user, &forged.token).await;
    }

    #[tokio::test]
    async fn test_verify_email_for_deleted_user_is_not_found() {
        let h = harness();
        let tokens = TokenService::new(&config().tokens);
        let token = tokens
            .issue(
                TokenPurpose::EmailVerification,
                UserId(42),
                &EmailVerificationClaims {
                    email: "ghost@x.com".to_string(),
                },
            )
            .unwrap();

        let err = h
            .service
            .verify_email(Some(&token.token), &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_login_errors_do_not_reveal_account_existence() {
        let h = harness();
        registered_and_verified(&h).await;
        let client = ClientContext::default();

        let wrong = h
            .service
            .login(login("ann@x.com", "wrongpass"), &client)
            .await
            .unwrap_err();
        let unknown = h
            .service
            .login(login("unknown@x.com", "anything"), &client)
            .await
            .unwrap_err();

        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_login_after_verification() {
        let h = harness();
        registered_and_verified(&h).await;

        let grant = h
            .service
            .login(login("ANN@x.com", "password1"), &ClientContext::default())
            .await
            .unwrap();
        assert_eq!(grant.user.email, "ann@x.com");
        assert!(!grant.access_token.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let h = harness();
        let session = registered_and_verified(&h).await;
        let client = ClientContext::default();
        let original = session.refresh_token.token;

        let rotated = h
            .service
            .refresh(Some(&original), &client)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token.token, original);

        let replay = h
            .service
            .refresh(Some(&original), &client)
            .await
            .unwrap_err();
        assert!(matches!(replay, AppError::Unauthorized(_)));

        assert!(h
            .service
            .refresh(Some(&rotated.refresh_token.token), &client)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_requires_token() {
        let h = harness();
        let err = h
            .service
            .refresh(None, &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == "Refresh token missing"));
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let h = harness();
        let session = registered_and_verified(&h).await;

        let err = h
            .service
            .refresh(Some(&session.access_token), &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_token() {
        let h = harness();
        let session = registered_and_verified(&h).await;
        let client = ClientContext::default();

        h.service
            .logout(Some(&session.refresh_token.token), &client)
            .await;

        let err = h
            .service
            .refresh(Some(&session.refresh_token.token), &client)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        // Logout without a cookie is still fine
        h.service.logout(None, &client).await;
    }

    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn find_by_email(&self, _: &str) -> StoreResult<Option<User>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn find_by_id(&self, _: UserId) -> StoreResult<Option<User>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn create(&self, _: NewUser) -> StoreResult<User> {
            Err(StoreError::Backend("unreachable".to_string()))
        }

        async fn mark_email_verified(&self, _: UserId) -> StoreResult<User> {
            Err(StoreError::NotFound)
        }
    }

    #[tokio::test]
    async fn test_store_timeout_surfaces_as_timeout() {
        let mut config = config();
        config.store.timeout_ms = 20;
        let service = AuthService::new(
            &config,
            Arc::new(StalledStore),
            Arc::new(InMemoryRefreshTokenRegistry::new()),
            Arc::new(TokenService::new(&config.tokens)),
            PasswordHasher::new(&config.password).unwrap(),
            Arc::new(MemoryOutbox::new()),
        );

        let err = service
            .login(login("ann@x.com", "password1"), &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[test]
    fn test_backend_failure_is_internal() {
        let err = store_error("user insert", StoreError::Backend("disk full".to_string()));
        assert!(!err.is_operational());
    }
}
