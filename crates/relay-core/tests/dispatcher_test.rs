//! Dispatcher integration tests: real PostgreSQL, mocked orchestrator and
//! object storage.

use std::sync::Arc;

use sqlx::PgPool;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::agents::AgentContext;
use relay_core::ai::{AiClient, AiConfig};
use relay_core::dispatcher::Dispatcher;
use relay_core::mail::EmailConfig;
use relay_core::metrics::Metrics;
use relay_core::orchestrator::OrchestratorClient;
use relay_core::storage::{ObjectStore, StorageConfig};
use relay_test_utils::{create_test_db, drop_test_db};

async fn seed_task(pool: &PgPool, id: &str, agent_type: &str, payload: serde_json::Value) {
    sqlx::query(
        "INSERT INTO tasks (id, job_id, name, agent_type, payload, status) \
         VALUES ($1, 'J1', $2, $3, $4, 'PENDING')",
    )
    .bind(id)
    .bind(format!("task-{id}"))
    .bind(agent_type)
    .bind(payload)
    .execute(pool)
    .await
    .expect("seed task");
}

/// Mock S3: accept any path-style PUT into the artifacts bucket.
async fn mock_storage() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/artifacts/.*"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn build_dispatcher(pool: PgPool, orchestrator: &MockServer, storage: &MockServer) -> Dispatcher {
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
        // No providers configured: AI calls fail fast and agents take their
        // deterministic fallbacks.
        ai: Arc::new(AiClient::new(AiConfig::default())),
        email: EmailConfig::default(),
        http: reqwest::Client::new(),
        production: false,
    };
    Dispatcher::new(ctx, Metrics::new())
}

fn message(task_id: &str, payload: serde_json::Value) -> Vec<u8> {
    serde_json::json!({"task_id": task_id, "job_id": "J1", "payload": payload})
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn transformer_happy_path_acks_and_completes() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(&pool, "T1", "transformer", serde_json::json!({})).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T1/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T1/complete"))
        .and(body_partial_json(serde_json::json!({
            "result": {
                "executor": "transformer",
                "transformed": ["A", "B"],
                "result": ["A", "B"],
                "original_count": 2
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let payload = serde_json::json!({"data": ["a", "b"], "transform": "uppercase"});
    let disposition = dispatcher.handle_message(&message("T1", payload)).await;

    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);
    assert!(dispatcher.in_progress().is_empty(), "claim released");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn scraper_chain_exposes_text_in_completion() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body><p>Hello world paragraph one that is sufficiently long.</p></body></html>",
        ))
        .mount(&site)
        .await;

    seed_task(&pool, "T1", "scraper", serde_json::json!({})).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T1/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T1/complete"))
        .and(body_partial_json(serde_json::json!({
            "result": {
                "executor": "scraper",
                "text": "Hello world paragraph one that is sufficiently long.",
                "status": "completed"
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let payload = serde_json::json!({"url": format!("{}/doc", site.uri())});
    let disposition = dispatcher.handle_message(&message("T1", payload)).await;

    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn chart_with_unresolved_template_fails_permanently() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(&pool, "T2", "chart", serde_json::json!({})).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T2/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T2/fail"))
        .and(body_string_contains("unresolved templates"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T2/complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let payload = serde_json::json!({
        "title": "Latency",
        "type": "bar",
        "x": ["a"],
        "y": ["{{tasks.a.outputs.y}}"]
    });
    let disposition = dispatcher.handle_message(&message("T2", payload)).await;

    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);
    // Validation failures are permanent: the retry counter is untouched.
    let retries = relay_db::queries::tasks::get_retry_count(&pool, "T2")
        .await
        .unwrap();
    assert_eq!(retries, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_delivery_is_dropped_without_start() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(&pool, "T3", "transformer", serde_json::json!({})).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T3/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let _claim =
        relay_core::dispatcher::InProgressSet::begin(dispatcher.in_progress(), "T3").unwrap();

    let disposition = dispatcher
        .handle_message(&message("T3", serde_json::json!({"data": []})))
        .await;
    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_task_is_acked_and_dropped() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    Mock::given(method("POST"))
        .and(path_regex("^/internal/tasks/.*"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let disposition = dispatcher
        .handle_message(&message("ghost", serde_json::json!({})))
        .await;
    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ownership_refused_drops_without_work() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(&pool, "T4", "transformer", serde_json::json!({})).await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T4/start"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T4/complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let disposition = dispatcher
        .handle_message(&message("T4", serde_json::json!({"data": []})))
        .await;
    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn review_rpc_failure_requeues_and_increments_retry() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(
        &pool,
        "T5",
        "reviewer",
        serde_json::json!({"target_task_id": "whatever"}),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T5/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    // Non-production short-circuits to an APPROVE review; the endpoint
    // rejecting it exercises the execution-retry path.
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T5/review"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let disposition = dispatcher
        .handle_message(&message("T5", serde_json::json!({"target_task_id": "x"})))
        .await;

    assert_eq!(disposition, relay_core::dispatcher::Disposition::NackRequeue);
    let retries = relay_db::queries::tasks::get_retry_count(&pool, "T5")
        .await
        .unwrap();
    assert_eq!(retries, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reviewer_approval_posts_review_not_complete() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    seed_task(
        &pool,
        "T6",
        "reviewer",
        serde_json::json!({"target_task_id": "x"}),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/internal/tasks/T6/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T6/review"))
        .and(body_partial_json(serde_json::json!({
            "score": 90,
            "decision": "APPROVE"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&orchestrator)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/tasks/T6/complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&orchestrator)
        .await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let disposition = dispatcher
        .handle_message(&message("T6", serde_json::json!({"target_task_id": "x"})))
        .await;
    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn malformed_message_is_acked() {
    let (pool, db_name) = create_test_db().await;
    let orchestrator = MockServer::start().await;
    let storage = mock_storage().await;

    let dispatcher = build_dispatcher(pool.clone(), &orchestrator, &storage);
    let disposition = dispatcher.handle_message(b"not json at all").await;
    assert_eq!(disposition, relay_core::dispatcher::Disposition::Ack);

    drop_test_db(&db_name).await;
}
