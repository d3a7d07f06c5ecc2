//! SMTP delivery with IPv4-forced resolution and STARTTLS -> SSL fallback.
//!
//! Gmail's SMTP endpoints resolve to IPv6 first in some environments where
//! IPv6 egress is broken, so the host is resolved to an IPv4 address before
//! connecting; TLS parameters keep the real hostname for certificate
//! validation. STARTTLS on 587 is tried first, implicit TLS on 465 second.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use super::{Attachment, DeliveryReport, DeliveryStatus, RecipientResult};

const SMTP_HOST: &str = "smtp.gmail.com";
const SMTP_STARTTLS_PORT: u16 = 587;
const SMTP_SSL_PORT: u16 = 465;
const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Send one message per recipient over SMTP.
///
/// Connection or authentication failure yields an `smtp_error` report for
/// every recipient; per-recipient send errors are tallied individually.
pub async fn send_via_smtp(
    user: &str,
    password: &str,
    recipients: &[String],
    subject: &str,
    body: &str,
    attachment: Option<&Attachment>,
) -> DeliveryReport {
    let transport = match connect(user, password).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(error = %e, "SMTP connection failed");
            return DeliveryReport::all_failed(
                DeliveryStatus::SmtpError,
                recipients,
                &format!("smtp_error: {e:#}"),
            );
        }
    };

    let from: Mailbox = match user.parse() {
        Ok(mailbox) => mailbox,
        Err(e) => {
            return DeliveryReport::all_failed(
                DeliveryStatus::SmtpError,
                recipients,
                &format!("smtp_error: invalid sender address: {e}"),
            );
        }
    };

    let mut results = Vec::with_capacity(recipients.len());
    let mut sent_count = 0;
    let mut error_count = 0;

    for recipient in recipients {
        let Ok(to) = recipient.parse::<Mailbox>() else {
            error_count += 1;
            results.push(RecipientResult {
                to: recipient.clone(),
                ok: false,
                error: Some("invalid_recipient".to_string()),
                message_id: None,
            });
            continue;
        };

        let message = match build_message(&from, to, subject, body, attachment) {
            Ok(message) => message,
            Err(e) => {
                error_count += 1;
                results.push(RecipientResult {
                    to: recipient.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    message_id: None,
                });
                continue;
            }
        };

        match transport.send(message).await {
            Ok(_) => {
                sent_count += 1;
                results.push(RecipientResult {
                    to: recipient.clone(),
                    ok: true,
                    error: None,
                    message_id: None,
                });
            }
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "SMTP send failed");
                error_count += 1;
                results.push(RecipientResult {
                    to: recipient.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    message_id: None,
                });
            }
        }
    }

    DeliveryReport {
        status: DeliveryStatus::Sent,
        sent_count,
        error_count,
        results,
        message_id: None,
    }
    .finalize()
}

/// Resolve the SMTP host to IPv4 and open a transport: STARTTLS on 587,
/// falling back to implicit TLS on 465.
async fn connect(user: &str, password: &str) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let ip = resolve_ipv4(SMTP_HOST).await?;
    let tls_parameters = TlsParameters::new(SMTP_HOST.to_string())
        .context("failed to build TLS parameters")?;
    let credentials = Credentials::new(user.to_string(), password.to_string());

    info!(host = SMTP_HOST, %ip, port = SMTP_STARTTLS_PORT, "connecting via STARTTLS");
    let starttls = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(ip.to_string())
        .port(SMTP_STARTTLS_PORT)
        .tls(Tls::Required(tls_parameters.clone()))
        .credentials(credentials.clone())
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    match starttls.test_connection().await {
        Ok(true) => return Ok(starttls),
        Ok(false) => warn!("STARTTLS connection test failed, trying SSL fallback"),
        Err(e) => warn!(error = %e, "STARTTLS connection failed, trying SSL fallback"),
    }

    info!(host = SMTP_HOST, %ip, port = SMTP_SSL_PORT, "connecting via implicit SSL");
    let ssl = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(ip.to_string())
        .port(SMTP_SSL_PORT)
        .tls(Tls::Wrapper(tls_parameters))
        .credentials(credentials)
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    match ssl.test_connection().await {
        Ok(true) => Ok(ssl),
        Ok(false) => Err(anyhow!("SSL connection test failed")),
        Err(e) => Err(e).context("SSL connection failed"),
    }
}

async fn resolve_ipv4(host: &str) -> Result<IpAddr> {
    let addresses = tokio::net::lookup_host((host, 0))
        .await
        .with_context(|| format!("failed to resolve {host}"))?;
    addresses
        .filter(|address| address.is_ipv4())
        .map(|address| address.ip())
        .next()
        .ok_or_else(|| anyhow!("no IPv4 address found for {host}"))
}

/// Build a message: plain text, or multipart with the PDF attached.
fn build_message(
    from: &Mailbox,
    to: Mailbox,
    subject: &str,
    body: &str,
    attachment: Option<&Attachment>,
) -> Result<Message> {
    let builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(subject);

    let message = match attachment {
        Some(attachment) => {
            let content_type =
                ContentType::parse("application/pdf").expect("static content type is valid");
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(
                        MailAttachment::new(attachment.filename.clone())
                            .body(attachment.bytes.clone(), content_type),
                    ),
            )?
        }
        None => builder.body(body.to_string())?,
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_attachment_is_multipart() {
        let from: Mailbox = "worker@x.test".parse().unwrap();
        let to: Mailbox = "ops@x.test".parse().unwrap();
        let attachment = Attachment {
            filename: "report.pdf".to_string(),
            bytes: vec![1, 2, 3, 4],
        };

        let message =
            build_message(&from, to, "Report", "Your report is ready", Some(&attachment)).unwrap();
        let formatted = String::from_utf8_lossy(&message.formatted()).into_owned();

        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("Content-Disposition: attachment"));
        assert!(formatted.contains("report.pdf"));
        assert!(formatted.contains("application/pdf"));
    }

    #[test]
    fn message_without_attachment_is_plain() {
        let from: Mailbox = "worker@x.test".parse().unwrap();
        let to: Mailbox = "ops@x.test".parse().unwrap();

        let message = build_message(&from, to, "Hi", "Body", None).unwrap();
        let formatted = String::from_utf8_lossy(&message.formatted()).into_owned();

        assert!(!formatted.contains("multipart/mixed"));
        assert!(formatted.contains("Body"));
    }

    #[tokio::test]
    async fn localhost_resolves_to_ipv4() {
        let ip = resolve_ipv4("localhost").await.unwrap();
        assert!(ip.is_ipv4());
    }
}
