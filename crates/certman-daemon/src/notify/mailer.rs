//! Mail delivery backends.
//!
//! [`SendGridMailer`] posts to the SendGrid v3 mail send API; [`LogMailer`]
//! only logs, for deployments without an API key.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::NotifyError;

/// A display name and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub email: String,
}

impl Mailbox {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    /// Parse `Name <address>` or a bare address.
    pub fn parse(s: &str) -> Result<Self, NotifyError> {
        let s = s.trim();
        let (name, email) = match (s.find('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                (s[..open].trim(), s[open + 1..close].trim())
            }
            (None, None) => ("", s),
            _ => return Err(NotifyError::Mailbox(s.to_string())),
        };
        if !email.contains('@') {
            return Err(NotifyError::Mailbox(s.to_string()));
        }
        Ok(Self::new(name, email))
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A rendered plain text message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: Mailbox,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotifyError>;
}

// =========================================================================
// SendGrid
// =========================================================================

#[derive(Debug, Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridAttachment<'a> {
    content: String,
    #[serde(rename = "type")]
    content_type: &'a str,
    filename: &'a str,
    disposition: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridMessage<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridAddress<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendGridAttachment<'a>>,
}

/// Client for the SendGrid v3 mail send API.
#[derive(Debug)]
pub struct SendGridMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    sender: Mailbox,
}

impl SendGridMailer {
    /// Create a mailer sending as `sender`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Request` if the HTTP client cannot be built.
    pub fn new(api_url: &str, api_key: &str, sender: Mailbox) -> Result<Self, NotifyError> {
        // Install ring as the default crypto provider (no-op if already installed).
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        debug!(api_url, sender = %sender, "SendGrid mailer initialized");

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            sender,
        })
    }

    fn build_message<'a>(&'a self, email: &'a Email) -> SendGridMessage<'a> {
        SendGridMessage {
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress {
                    email: &email.to.email,
                    name: &email.to.name,
                }],
            }],
            from: SendGridAddress {
                email: &self.sender.email,
                name: &self.sender.name,
            },
            subject: &email.subject,
            content: vec![SendGridContent {
                content_type: "text/plain",
                value: &email.text,
            }],
            attachments: email
                .attachments
                .iter()
                .map(|a| SendGridAttachment {
                    content: STANDARD.encode(&a.content),
                    content_type: &a.content_type,
                    filename: &a.filename,
                    disposition: "attachment",
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.build_message(email))
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(to = %email.to.email, subject = %email.subject, "Email sent");
            Ok(())
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "SendGrid API returned error");
            Err(NotifyError::ApiError {
                status: status_code,
                body,
            })
        }
    }
}

// =========================================================================
// Log only
// =========================================================================

/// Logs messages instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email not sent, no mail API configured"
        );
        Ok(())
    }
}

// =========================================================================
// Test double
// =========================================================================
