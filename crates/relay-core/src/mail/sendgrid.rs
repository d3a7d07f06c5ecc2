//! HTTP email delivery via the SendGrid v3 mail API.
//!
//! Used as the fallback where SMTP egress is blocked. One request covers
//! all recipients; SendGrid replies 202 with an empty body, so the
//! `X-Message-Id` header is the only delivery identifier worth keeping.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tracing::{info, warn};

use super::{Attachment, DeliveryReport, DeliveryStatus, EmailConfig, RecipientResult};

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

/// Send one request covering every recipient via the v3 mail API.
///
/// Requires an explicit verified sender: there is no fallback to the SMTP
/// user because SendGrid silently drops mail from unverified senders.
pub async fn send_via_sendgrid(
    http: &reqwest::Client,
    config: &EmailConfig,
    api_key: &str,
    recipients: &[String],
    subject: &str,
    body: &str,
    attachment: Option<&Attachment>,
) -> DeliveryReport {
    let Some(from_email) = config.sendgrid_from_email.as_deref() else {
        return DeliveryReport::all_failed(
            DeliveryStatus::SendgridError,
            recipients,
            "SENDGRID_FROM_EMAIL is not set (must be a verified sender)",
        );
    };

    let personalizations: Vec<serde_json::Value> = recipients
        .iter()
        .filter(|recipient| !recipient.trim().is_empty())
        .map(|recipient| json!({"to": [{"email": recipient}]}))
        .collect();
    if personalizations.is_empty() {
        return DeliveryReport {
            status: DeliveryStatus::NoRecipients,
            sent_count: 0,
            error_count: recipients.len(),
            results: Vec::new(),
            message_id: None,
        };
    }

    let mut payload = json!({
        "personalizations": personalizations,
        "from": {"email": from_email},
        "subject": subject,
        "content": [{"type": "text/plain", "value": body}],
    });
    if let Some(attachment) = attachment {
        payload["attachments"] = json!([{
            "content": BASE64.encode(&attachment.bytes),
            "type": "application/pdf",
            "filename": attachment.filename,
            "disposition": "attachment",
        }]);
    }

    let base_url = config
        .sendgrid_base_url
        .as_deref()
        .unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{}/v3/mail/send", base_url.trim_end_matches('/'));

    info!(recipients = recipients.len(), from = from_email, "sending via SendGrid");
    let response = match http.post(&url).bearer_auth(api_key).json(&payload).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "SendGrid request failed");
            return DeliveryReport::all_failed(
                DeliveryStatus::SendgridError,
                recipients,
                &format!("sendgrid_error: {e}"),
            );
        }
    };

    let status = response.status();
    let message_id = response
        .headers()
        .get("x-message-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if message_id.is_none() {
        warn!("SendGrid response missing X-Message-Id header");
    }

    if matches!(status.as_u16(), 200 | 201 | 202) {
        info!(status = status.as_u16(), message_id = ?message_id, "SendGrid accepted the request");
        return DeliveryReport {
            status: DeliveryStatus::Sent,
            sent_count: recipients.len(),
            error_count: 0,
            results: recipients
                .iter()
                .map(|to| RecipientResult {
                    to: to.clone(),
                    ok: true,
                    error: None,
                    message_id: message_id.clone(),
                })
                .collect(),
            message_id,
        };
    }

    let response_body = response.text().await.unwrap_or_default();
    let truncated: String = response_body.chars().take(200).collect();
    let error = format!("SendGrid API error: HTTP {status} - {truncated}");
    warn!(%error, "SendGrid rejected the request");
    DeliveryReport::all_failed(DeliveryStatus::SendgridError, recipients, &error)
}
