//! Mail transports.
//!
//! `ResendEmailSender` posts to the Resend HTTP API; without an API key the worker uses
//! `LogEmailSender`, which only writes the message to the log.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

// =============================================================================
// Core trait
// =============================================================================

/// A rendered message
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, msg: EmailMessage) -> Result<()>;
}

// =============================================================================
// LogEmailSender
// =============================================================================

pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        info!(
            to = %msg.to,
            subject = %msg.subject,
            "Mail transport disabled, message not sent\n{}",
            msg.text,
        );
        Ok(())
    }
}

// =============================================================================
// ResendEmailSender
// =============================================================================

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

pub struct ResendEmailSender {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendEmailSender {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, msg: EmailMessage) -> Result<()> {
        let payload = ResendPayload {
            from: &self.from,
            to: [&msg.to],
            subject: &msg.subject,
            html: &msg.html,
            text: &msg.text,
        };

        let response = self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Resend API error {}: {}", status, body));
        }

        info!(to = %msg.to, subject = %msg.subject, "Email sent via Resend");
        Ok(())
    }
}

// =============================================================================
// FakeEmailSender (tests)
// =============================================================================

#[cfg(test)]
pub use fake::FakeEmailSender;
