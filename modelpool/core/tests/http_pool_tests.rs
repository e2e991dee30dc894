//! Pools built from a TOML pool file, dispatching over real HTTP
//!
//! Each provider is a wiremock server speaking the OpenAI chat surface. The
//! pool file is written to disk, loaded, and turned into dispatchers through
//! the factory and registry exactly as the CLI does it.

use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modelpool_core::{
    load_config_from_path, DispatchRequest, EnvSecretDecryptor, ErrorCode, FactoryError,
    HealthStatus, OpenAiCompatTransport, PoolFactory, PoolFile, PoolRegistry, StaticConfigSource,
    StrategyKind, StreamChunk,
};

// =============================================================================
// Fixtures
// =============================================================================

fn pool_file(primary: &MockServer, backup: &MockServer, extra: &str) -> String {
    format!(
        r#"
[health]
unavailable_threshold = 2

[[platforms]]
platform_id = "primary"
name = "Primary"
api_url = "{primary}/v1"
encrypted_api_key = "sk-primary"

[[platforms]]
platform_id = "backup"
name = "Backup"
api_url = "{backup}/v1"
encrypted_api_key = "env:MODELPOOL_TEST_BACKUP_KEY"

[[groups]]
name = "chat"
strategy = "sequential"

[[groups.models]]
platform_id = "primary"
model_id = "gpt-small"
priority = 1

[[groups.models]]
platform_id = "backup"
model_id = "gpt-large"
priority = 2
max_tokens = 256
{extra}
"#,
        primary = primary.uri(),
        backup = backup.uri(),
    )
}

fn load(content: &str) -> PoolFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    load_config_from_path(file.path()).unwrap()
}

fn registry(file: PoolFile) -> PoolRegistry {
    std::env::set_var("MODELPOOL_TEST_BACKUP_KEY", "sk-backup");

    let health = file.health.clone();
    let factory = PoolFactory::new(
        Arc::new(StaticConfigSource::new(file)),
        Arc::new(EnvSecretDecryptor),
        Arc::new(OpenAiCompatTransport::new().unwrap()),
    )
    .with_health_config(health);
    PoolRegistry::new(factory)
}

fn chat_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }],
        "usage": { "prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9 }
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_failover_across_http_providers() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-primary"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": { "message": "primary overloaded" }
        })))
        .expect(2)
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-backup"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-large",
            "max_tokens": 256
        })))
        .respond_with(chat_reply("from backup"))
        .expect(3)
        .mount(&backup)
        .await;

    let registry = registry(load(&pool_file(&primary, &backup, "")));
    let pool = registry.get_or_build("chat").await.unwrap();
    assert_eq!(pool.config().strategy, StrategyKind::Sequential);
    assert_eq!(pool.endpoints().len(), 2);

    for _ in 0..2 {
        let response = pool.dispatch(DispatchRequest::chat("hello")).await;
        assert!(response.success);
        assert_eq!(response.endpoint.as_ref().unwrap().platform_name, "Backup");
        assert_eq!(response.token_usage.unwrap().total_tokens, 9);
        assert_eq!(
            response.content.unwrap()["choices"][0]["message"]["content"],
            "from backup"
        );
    }

    // Two failures reach the configured threshold; the primary is skipped now
    assert_eq!(
        pool.tracker().status("primary:gpt-small"),
        HealthStatus::Unavailable
    );
    let response = pool.dispatch(DispatchRequest::chat("hello")).await;
    assert!(response.success);
    assert_eq!(response.endpoints_attempted, 1);
}

#[tokio::test]
async fn test_registry_caches_and_reseeds_on_invalidate() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    // The seeded primary is never contacted
    Mock::given(method("POST"))
        .respond_with(chat_reply("primary"))
        .expect(0)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(chat_reply("backup"))
        .mount(&backup)
        .await;

    let seeds = r#"
[[health_seeds]]
endpoint_id = "primary:gpt-small"
consecutive_failures = 4
status = "unavailable"

[[health_seeds]]
endpoint_id = "elsewhere:unrelated"
consecutive_failures = 9
"#;
    let registry = registry(load(&pool_file(&primary, &backup, seeds)));

    let first = registry.get_or_build("chat").await.unwrap();
    let second = registry.get_or_build("chat").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.cached(), vec!["chat".to_string()]);

    // Only seeds of the pool's own endpoints are imported
    assert_eq!(first.tracker().tracked_count(), 1);
    assert!(!first.tracker().is_available("primary:gpt-small"));

    let response = first.dispatch(DispatchRequest::chat("hello")).await;
    assert!(response.success);
    assert_eq!(
        response.endpoint.as_ref().unwrap().endpoint_id,
        "backup:gpt-large"
    );

    assert!(registry.invalidate("chat"));
    assert!(!registry.invalidate("chat"));
    let rebuilt = registry.get_or_build("chat").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert!(!rebuilt.tracker().is_available("primary:gpt-small"));
}

#[tokio::test]
async fn test_unknown_group() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;
    let registry = registry(load(&pool_file(&primary, &backup, "")));

    let result = registry.get_or_build("missing").await;
    assert!(matches!(result, Err(FactoryError::GroupNotFound(name)) if name == "missing"));
    assert!(registry.cached().is_empty());
}

#[tokio::test]
async fn test_stream_over_sse() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&primary)
        .await;

    let registry = registry(load(&pool_file(&primary, &backup, "")));
    let pool = registry.get_or_build("chat").await.unwrap();

    let chunks = pool
        .dispatch_stream(DispatchRequest::chat("hello"))
        .collect_chunks()
        .await;

    assert!(matches!(
        &chunks[0],
        StreamChunk::Start { endpoint, .. } if endpoint.endpoint_id == "primary:gpt-small"
    ));
    assert_eq!(
        chunks[1..3].to_vec(),
        vec![
            StreamChunk::Text {
                content: "Hel".to_string()
            },
            StreamChunk::Text {
                content: "lo".to_string()
            },
        ]
    );
    match chunks.last() {
        Some(StreamChunk::Done {
            finish_reason,
            usage,
        }) => {
            assert_eq!(finish_reason.as_deref(), Some("stop"));
            assert_eq!(usage.map(|u| u.total_tokens), Some(5));
        }
        other => panic!("Expected done chunk, got {other:?}"),
    }
    assert_eq!(chunks.len(), 4);
    assert_eq!(
        pool.tracker().status("primary:gpt-small"),
        HealthStatus::Healthy
    );
}

#[tokio::test]
async fn test_stream_all_providers_down() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;
    for server in [&primary, &backup] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(server)
            .await;
    }

    let registry = registry(load(&pool_file(&primary, &backup, "")));
    let pool = registry.get_or_build("chat").await.unwrap();

    let chunks = pool
        .dispatch_stream(DispatchRequest::chat("hello"))
        .collect_chunks()
        .await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error { code, message } => {
            assert_eq!(*code, ErrorCode::UpstreamError);
            assert!(message.contains("503"), "{message}");
        }
        other => panic!("Expected error chunk, got {other:?}"),
    }
    assert_eq!(pool.tracker().consecutive_failures("primary:gpt-small"), 1);
    assert_eq!(pool.tracker().consecutive_failures("backup:gpt-large"), 1);
}
