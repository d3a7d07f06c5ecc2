//! Multi-channel email delivery: SMTP with an HTTP provider fallback.
//!
//! The notifier agent owns provider selection (`auto` / `smtp` / `http`)
//! and the dev-mode downgrade; this module provides the two senders, the
//! recipient normalizer, and the shared delivery accounting.

pub mod recipients;
pub mod sendgrid;
pub mod smtp;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use recipients::{normalize_recipients, recipients_from_payload};

/// Which provider(s) the notifier may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmailProviderMode {
    /// SMTP first, HTTP fallback when SMTP sends nothing.
    #[default]
    Auto,
    Smtp,
    Http,
}

impl fmt::Display for EmailProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Smtp => "smtp",
            Self::Http => "http",
        };
        f.write_str(s)
    }
}

impl FromStr for EmailProviderMode {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to `auto` rather than refusing to start.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "smtp" => Self::Smtp,
            "http" => Self::Http,
            _ => Self::Auto,
        })
    }
}

/// Email subsystem configuration, resolved from env by the binary.
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub provider: EmailProviderMode,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub sendgrid_api_key: Option<String>,
    /// Must be a verified sender; there is intentionally no fallback to the
    /// SMTP user because unverified senders get silently dropped.
    pub sendgrid_from_email: Option<String>,
    /// Overridable for tests.
    pub sendgrid_base_url: Option<String>,
}

impl EmailConfig {
    pub fn has_smtp_credentials(&self) -> bool {
        self.smtp_user.is_some() && self.smtp_password.is_some()
    }
}

/// A resolved attachment (the job's latest current PDF).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Aggregate delivery status across recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Partial,
    Failed,
    NoRecipients,
    MissingCredentials,
    SmtpError,
    SendgridError,
    Skipped,
}

impl DeliveryStatus {
    /// Statuses that mean nothing was delivered and the task should fail
    /// (outside dev mode).
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            Self::NoRecipients
                | Self::MissingCredentials
                | Self::Failed
                | Self::SmtpError
                | Self::SendgridError
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sent => "sent",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::NoRecipients => "no_recipients",
            Self::MissingCredentials => "missing_credentials",
            Self::SmtpError => "smtp_error",
            Self::SendgridError => "sendgrid_error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-recipient delivery outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientResult {
    pub to: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Outcome of one provider's delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub status: DeliveryStatus,
    pub sent_count: usize,
    pub error_count: usize,
    pub results: Vec<RecipientResult>,
    pub message_id: Option<String>,
}

impl DeliveryReport {
    /// Apply the shared sent/partial/failed downgrade to a report whose
    /// provider-level status is still `Sent`.
    pub fn finalize(mut self) -> Self {
        if self.status == DeliveryStatus::Sent && self.error_count > 0 {
            self.status = if self.sent_count == 0 {
                DeliveryStatus::Failed
            } else {
                DeliveryStatus::Partial
            };
        }
        self
    }

    /// A report where every recipient failed with the same error.
    pub fn all_failed(
        status: DeliveryStatus,
        recipients: &[String],
        error: &str,
    ) -> Self {
        Self {
            status,
            sent_count: 0,
            error_count: recipients.len(),
            results: recipients
                .iter()
                .map(|to| RecipientResult {
                    to: to.clone(),
                    ok: false,
                    error: Some(error.to_string()),
                    message_id: None,
                })
                .collect(),
            message_id: None,
        }
    }
}
