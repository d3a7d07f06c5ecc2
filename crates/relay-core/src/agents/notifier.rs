//! Notifier agent: email delivery over SMTP with an HTTP fallback, and
//! attachment resolution from the job's latest PDF.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::{Value, json};

use relay_db::models::LogLevel;
use relay_db::queries::artifacts;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::mail::{
    Attachment, DeliveryReport, DeliveryStatus, EmailProviderMode, recipients_from_payload,
    sendgrid::send_via_sendgrid, smtp::send_via_smtp,
};

const DEFAULT_SUBJECT: &str = "Notification from workflow";
const DEFAULT_MESSAGE: &str = "Notification from workflow";

/// A relative `/api/` path at the start of the message or after whitespace.
/// Absolute URLs already carrying a host are left alone.
static RELATIVE_API_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)(/api/)").expect("api-path regex is valid"));

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let channel = payload
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or("email");
    if channel != "email" {
        ctx.log(
            &task.id,
            LogLevel::Warn,
            &format!("Notifier channel '{channel}' not supported; only 'email' is implemented"),
        )
        .await;
    }

    let recipients = recipients_from_payload(payload);
    let subject = payload
        .get("subject")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);

    let attachment = resolve_attachment(ctx, task).await;
    if attachment.is_none() {
        ctx.log(
            &task.id,
            LogLevel::Info,
            "No PDF attachment found for job; sending notification without attachment",
        )
        .await;
    }

    let message = build_message(ctx, task, payload, attachment.is_some());

    let mode = ctx.email.provider;
    let mut provider_used: Option<&'static str> = None;
    let mut report = if recipients.is_empty() {
        ctx.log(&task.id, LogLevel::Warn, "Notifier called with empty recipients list")
            .await;
        DeliveryReport {
            status: DeliveryStatus::NoRecipients,
            sent_count: 0,
            error_count: 0,
            results: Vec::new(),
            message_id: None,
        }
    } else {
        deliver(
            ctx,
            task,
            mode,
            &recipients,
            subject,
            &message,
            attachment.as_ref(),
            &mut provider_used,
        )
        .await
    };
    report = report.finalize();

    let from = match provider_used {
        Some("sendgrid_http") => ctx.email.sendgrid_from_email.clone(),
        _ => ctx.email.smtp_user.clone(),
    };
    let attachment_meta = attachment.as_ref().map(|attachment| {
        json!({"filename": attachment.filename, "bytes": attachment.bytes.len()})
    });

    // Dev mode rewrites a failed send into a skipped pseudo-success.
    let mut status = report.status;
    if status.is_terminal_failure() && !ctx.production {
        ctx.log(
            &task.id,
            LogLevel::Warn,
            &format!("Notifier failure downgraded to skipped (status={status}, non-production)"),
        )
        .await;
        status = DeliveryStatus::Skipped;
    }

    let notification = json!({
        "channel": channel,
        "provider": provider_used,
        "from": from,
        "subject": subject,
        "sent_to": recipients,
        "message_preview": message.chars().take(100).collect::<String>(),
        "attachment": attachment_meta,
        "status": status,
        "sent_count": report.sent_count,
        "error_count": report.error_count,
        "results": report.results,
    });
    let artifact = ArtifactOutput::json(task, "_notification", "notification.json", &notification);

    if status.is_terminal_failure() {
        let error = format!(
            "notifier_failed: status={status} sent={} failed={} provider={}",
            report.sent_count,
            report.error_count,
            provider_used.unwrap_or("none"),
        );
        ctx.log(&task.id, LogLevel::Error, &error).await;
        return Ok(AgentOutcome::Fail {
            error,
            artifact: Some(artifact),
        });
    }

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!(
            "Notification status={status} via {channel}: sent={} failed={}",
            report.sent_count, report.error_count
        ),
    )
    .await;

    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "notifier",
        "notifications_sent": report.sent_count,
        "notifications_failed": report.error_count,
        "status": status,
        "provider": provider_used,
    });

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Run the provider selection policy and return the delivery report.
#[allow(clippy::too_many_arguments)]
async fn deliver(
    ctx: &AgentContext,
    task: &TaskInfo,
    mode: EmailProviderMode,
    recipients: &[String],
    subject: &str,
    message: &str,
    attachment: Option<&Attachment>,
    provider_used: &mut Option<&'static str>,
) -> DeliveryReport {
    let mut report = DeliveryReport {
        status: DeliveryStatus::MissingCredentials,
        sent_count: 0,
        error_count: 0,
        results: Vec::new(),
        message_id: None,
    };

    // SMTP leg: auto and smtp modes.
    if matches!(mode, EmailProviderMode::Auto | EmailProviderMode::Smtp) {
        if let (Some(user), Some(password)) =
            (ctx.email.smtp_user.as_deref(), ctx.email.smtp_password.as_deref())
        {
            ctx.log(&task.id, LogLevel::Info, &format!("Attempting SMTP delivery via {user}"))
                .await;
            report = send_via_smtp(user, password, recipients, subject, message, attachment).await;
            ctx.log(
                &task.id,
                LogLevel::Info,
                &format!(
                    "SMTP result: status={}, sent={}, errors={}",
                    report.status, report.sent_count, report.error_count
                ),
            )
            .await;
            if matches!(report.status, DeliveryStatus::Sent | DeliveryStatus::Partial) {
                *provider_used = Some("gmail_smtp");
                return report;
            }
        } else {
            ctx.log(&task.id, LogLevel::Warn, "SMTP credentials not set, skipping SMTP")
                .await;
            if mode == EmailProviderMode::Smtp {
                return DeliveryReport::all_failed(
                    DeliveryStatus::MissingCredentials,
                    recipients,
                    "missing_credentials",
                );
            }
        }
    }

    // HTTP leg: http mode, or auto after SMTP delivered nothing.
    let wants_http = mode == EmailProviderMode::Http
        || (mode == EmailProviderMode::Auto
            && !matches!(report.status, DeliveryStatus::Sent | DeliveryStatus::Partial));
    if wants_http {
        match ctx.email.sendgrid_api_key.as_deref() {
            Some(api_key) => {
                ctx.log(&task.id, LogLevel::Info, "Attempting HTTP delivery via SendGrid")
                    .await;
                report = send_via_sendgrid(
                    &ctx.http, &ctx.email, api_key, recipients, subject, message, attachment,
                )
                .await;
                *provider_used = Some("sendgrid_http");
                ctx.log(
                    &task.id,
                    LogLevel::Info,
                    &format!(
                        "SendGrid result: status={}, message_id={:?}",
                        report.status, report.message_id
                    ),
                )
                .await;
            }
            None if mode == EmailProviderMode::Http => {
                ctx.log(&task.id, LogLevel::Error, "SendGrid API key not set for HTTP mode")
                    .await;
                report = DeliveryReport::all_failed(
                    DeliveryStatus::MissingCredentials,
                    recipients,
                    "missing_sendgrid_key",
                );
            }
            None => {
                ctx.log(
                    &task.id,
                    LogLevel::Error,
                    "SMTP failed and SENDGRID_API_KEY is not set; cannot use HTTP fallback",
                )
                .await;
            }
        }
    }

    report
}

/// Build the message body: the canonical report line when the payload gave
/// nothing and a PDF exists, then absolutize relative `/api/` paths.
fn build_message(
    ctx: &AgentContext,
    task: &TaskInfo,
    payload: &Value,
    has_attachment: bool,
) -> String {
    let raw = payload.get("message").and_then(Value::as_str).unwrap_or("");
    let message = if raw.trim().is_empty() {
        if has_attachment {
            let job_id = task.job_id.as_deref().unwrap_or("unknown");
            format!(
                "Your report is ready: /api/jobs/{job_id}/artifacts?type=pdf&role=report&download=1"
            )
        } else {
            DEFAULT_MESSAGE.to_string()
        }
    } else {
        raw.to_string()
    };

    let base = ctx.orchestrator.base_url().to_string();
    RELATIVE_API_RE
        .replace_all(&message, format!("${{1}}{base}/api/"))
        .into_owned()
}

/// Resolve the job's latest current PDF and fetch its bytes.
async fn resolve_attachment(ctx: &AgentContext, task: &TaskInfo) -> Option<Attachment> {
    let job_id = task.job_id.as_deref()?;

    let pdf = match artifacts::latest_current_pdf(&ctx.pool, job_id).await {
        Ok(pdf) => pdf?,
        Err(e) => {
            ctx.log(
                &task.id,
                LogLevel::Error,
                &format!("Failed to resolve PDF attachment for job {job_id}: {e:#}"),
            )
            .await;
            return None;
        }
    };

    let storage_key = pdf.storage_key.as_deref().filter(|k| !k.is_empty())?;
    match ctx.storage.get(storage_key).await {
        Ok(bytes) => {
            ctx.log(
                &task.id,
                LogLevel::Info,
                &format!(
                    "Resolved PDF attachment for job {job_id}: storage_key='{storage_key}' bytes={}",
                    bytes.len()
                ),
            )
            .await;
            Some(Attachment {
                filename: pdf.filename.unwrap_or_else(|| "report.pdf".to_string()),
                bytes,
            })
        }
        Err(e) => {
            ctx.log(
                &task.id,
                LogLevel::Error,
                &format!("Failed to download PDF attachment '{storage_key}': {e:#}"),
            )
            .await;
            None
        }
    }
}
