//! Outbound email collaborator
//!
//! Delivery itself is out of scope for this service. [`LogEmailSender`] writes
//! the verification link to the log, and [`MemoryOutbox`] keeps messages in
//! memory for tests and local tooling.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Path of the verification endpoint, relative to the public base URL
pub const VERIFY_EMAIL_PATH: &str = "/api/v1/auth/verify-email";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid public base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("email delivery failed: {0}")]
    Delivery(String),
}

/// A verification message handed to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEmail {
    pub to: String,
    pub name: String,
    pub link: String,
    pub token: String,
}

impl VerificationEmail {
    /// Build the message, deriving the link from `base_url`
    pub fn new(base_url: &str, to: &str, name: &str, token: &str) -> Result<Self, EmailError> {
        let mut link = Url::parse(base_url)?.join(VERIFY_EMAIL_PATH)?;
        link.query_pairs_mut().append_pair("token", token);

        Ok(Self {
            to: to.to_string(),
            name: name.to_string(),
            link: link.into(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), EmailError>;
}

/// Logs each message instead of delivering it
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), EmailError> {
        tracing::info!(
            to = %email.to,
            link = %email.link,
            "verification email queued"
        );
        Ok(())
    }
}

/// Captures messages in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryOutbox {
    sent: Arc<Mutex<Vec<VerificationEmail>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<VerificationEmail> {
        self.sent.lock().clone()
    }

    /// Most recent verification token sent to `to`
    pub fn last_token_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| m.to == to)
            .map(|m| m.token.clone())
    }
}

#[async_trait]
impl EmailSender for MemoryOutbox {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), EmailError> {
        self.sent.lock().push(email.clone());
        Ok(())
    }
}
