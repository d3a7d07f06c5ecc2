//! Notifier flow: attachment resolution by job and the SMTP -> HTTP
//! provider fallback in auto mode.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sqlx::PgPool;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::agents::AgentContext;
use relay_core::ai::{AiClient, AiConfig};
use relay_core::dispatcher::{Dispatcher, Disposition};
use relay_core::mail::{EmailConfig, EmailProviderMode};
use relay_core::metrics::Metrics;
use relay_core::orchestrator::OrchestratorClient;
use relay_core::storage::{ObjectStore, StorageConfig};
use relay_test_utils::{create_test_db, drop_test_db};

async fn seed_notifier_task(pool: &PgPool, id: &str) {
    sqlx::query(
        "INSERT INTO tasks (id, job_id, name, agent_type, payload, status) \
         VALUES ($1, 'J1', 'notify', 'notifier', '{}', 'PENDING')",
    )
    .bind(id)
    .execute(pool)
    .await
    .expect("seed task");
}

async fn seed_current_pdf(pool: &PgPool) {
    sqlx::query(
        "INSERT INTO artifacts (id, task_id, job_id, type, filename, storage_key, role, is_current) \
         VALUES ('p1', 'D1', 'J1', 'pdf', 'report.pdf', 'jobs/J1/report.pdf', 'report', TRUE)",
    )
    .execute(pool)
    .await
    .expect("seed pdf artifact");
}

fn build_dispatcher(
    pool: PgPool,
    orchestrator: &MockServer,
    storage: &MockServer,
    email: EmailConfig,
    production: bool,
) -> Dispatcher {
    let ctx = AgentContext {
        pool,
        storage: ObjectStore::new(&StorageConfig {
            endpoint: storage.uri(),
            access_key: "test".to_string(),
            secret_key: "test".to_string(),
            bucket: "artifacts".to_string(),
            use_ssl: false,
            region: "us-east-1".to_string(),
        }),
        orchestrator: OrchestratorClient::new(orchestrator.uri()),
        ai: Arc::new(AiClient::new(AiConfig::default())),
        email,
        http: reqwest::Client::new(),
        production,
    };
    Dispatcher::new(ctx, Metrics::new())
}

fn message(task_id: &str, payload: serde_json::Value) -> Vec<u8> {
    serde_json::json!({"task_id": task_id, "job_id": "J1", "payload": payload})
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn auto_mode_falls_back_to_sendgrid_with_pdf_attachment() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let sendgrid = MockServer::start().await;

    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/J1/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pdf-bytes".to_vec()))
        .mount(&storage)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex("^/artifacts/.*"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&storage)
        .await;

    seed_notifier_task(&pool, "N1").await;
    seed_current_pdf(&pool).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/N1/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;

    // One SendGrid request carrying the base64 PDF and the canonical
    // message rewritten to an absolute URL.
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(body_string_contains(BASE64.encode(b"pdf-bytes")))
        .and(body_string_contains(format!(
            "Your report is ready: {}/api/jobs/J1/artifacts",
            orchestrator.uri()
        )))
        .respond_with(ResponseTemplate::new(202).insert_header("X-Message-Id", "msg-1"))
        .expect(1)
        .mount(&sendgrid)
        .await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/N1/complete"))
        .and(body_partial_json(serde_json::json!({
            "result": {
                "executor": "notifier",
                "notifications_sent": 1,
                "notifications_failed": 0,
                "status": "sent",
                "provider": "sendgrid_http"
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;

    // No SMTP credentials: the auto-mode SMTP leg is skipped and HTTP
    // delivery takes over.
    let email = EmailConfig {
        provider: EmailProviderMode::Auto,
        sendgrid_api_key: Some("sg-key".to_string()),
        sendgrid_from_email: Some("reports@x.test".to_string()),
        sendgrid_base_url: Some(sendgrid.uri()),
        ..EmailConfig::default()
    };
    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage, email, false);

    let payload = serde_json::json!({
        "recipients": "ops@x.test",
        "subject": "Report",
        "message": ""
    });
    assert_eq!(
        dispatcher.handle_message(&message("N1", payload)).await,
        Disposition::Ack
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn missing_credentials_are_skipped_outside_production() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;

    let storage = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/artifacts/.*"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&storage)
        .await;

    seed_notifier_task(&pool, "N2").await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/N2/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    // Dev mode: no provider configured at all still completes as skipped.
    Mock::given(method("POST"))
        .and(path("/internal/tasks/N2/complete"))
        .and(body_partial_json(serde_json::json!({
            "result": {"executor": "notifier", "status": "skipped"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/N2/fail"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(
        pool.clone(),
        &orchestrator,
        &storage,
        EmailConfig::default(),
        false,
    );
    let payload = serde_json::json!({"recipients": ["ops@x.test"], "message": "hello"});
    assert_eq!(
        dispatcher.handle_message(&message("N2", payload)).await,
        Disposition::Ack
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn no_recipients_fails_in_production() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;

    let storage = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/artifacts/.*"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&storage)
        .await;

    seed_notifier_task(&pool, "N3").await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/N3/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/N3/fail"))
        .and(body_string_contains("notifier_failed: status=no_recipients"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;

    // Production: the failure is terminal instead of skipped.
    let email = EmailConfig {
        sendgrid_api_key: Some("sg-key".to_string()),
        sendgrid_from_email: Some("reports@x.test".to_string()),
        ..EmailConfig::default()
    };
    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage, email, true);

    let payload = serde_json::json!({"recipients": [], "message": "hello"});
    assert_eq!(
        dispatcher.handle_message(&message("N3", payload)).await,
        Disposition::Ack
    );

    drop_test_db(&db_name).await;
}
