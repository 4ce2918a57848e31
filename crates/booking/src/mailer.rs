//! Outbound email for ticket delivery.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::info;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Delivers email. Returns the provider's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

// --- Resend ---

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    attachments: Vec<ResendAttachment<'a>>,
}

#[derive(Serialize)]
struct ResendAttachment<'a> {
    filename: &'a str,
    content: String,
    content_type: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

/// Sends through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self { http, api_key: api_key.into(), from: from.into() }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let body = ResendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            text: &email.text,
            attachments: email
                .attachments
                .iter()
                .map(|a| ResendAttachment {
                    filename: &a.filename,
                    content: STANDARD.encode(&a.content),
                    content_type: &a.content_type,
                })
                .collect(),
        };

        let resp = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Resend request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("Resend returned {status}: {detail}");
        }
        let sent: ResendResponse = resp.json().await?;
        info!(to = %email.to, message_id = %sent.id, "Email sent via Resend");
        Ok(sent.id)
    }
}

/// Logs instead of sending. Used when no Resend API key is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email delivery disabled, message logged only"
        );
        Ok("logged".to_string())
    }
}
