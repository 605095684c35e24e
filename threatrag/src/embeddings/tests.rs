//! Tests for the OpenAI-compatible backend and the gateway in front of it.
//!
//! Covers:
//! 1. Request format and headers
//! 2. Error classification of single attempts (429, 5xx, 401, malformed)
//! 3. Gateway retry with backoff, whole-batch retry and exhaustion
//! 4. Gateway batching, ordering, dedup and caching

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::embeddings::api::{ApiConfig, EmbeddingApiClient};
use crate::embeddings::{EmbeddingBackend, EmbeddingCache, EmbeddingGateway};
use crate::error::RagError;
use crate::retry::RetryPolicy;

fn test_config(base_url: &str) -> ApiConfig {
    ApiConfig {
        provider: "openai".to_string(),
        base_url: base_url.to_string(),
        api_key: Some("test-api-key".to_string()),
        model: "text-embedding-3-small".to_string(),
        dimensions: 3,
        timeout_secs: 10,
    }
}

fn embedding_response(embeddings: Vec<Vec<f32>>) -> serde_json::Value {
    json!({
        "data": embeddings.into_iter().map(|e| json!({ "embedding": e })).collect::<Vec<_>>()
    })
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(10)).with_base_delay(Duration::from_millis(1))
}

fn gateway_for(server: &MockServer, max_attempts: u32) -> EmbeddingGateway {
    let client = EmbeddingApiClient::new(test_config(&server.uri())).unwrap();
    EmbeddingGateway::new(Arc::new(client), fast_retry(max_attempts))
}

fn texts(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Backend: request format
// =============================================================================

#[tokio::test]
async fn test_api_client_request_format_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("content-type", "application/json"))
        .and(header("authorization", "Bearer test-api-key"))
        .and(body_json(json!({
            "model": "text-embedding-3-small",
            "input": ["hello world"]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(embedding_response(vec![vec![0.1, 0.2, 0.3]])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let embeddings = client.embed(&texts(&["hello world"])).await.unwrap();
    assert_eq!(embeddings, vec![vec![0.1, 0.2, 0.3]]);
    assert_eq!(client.name(), "openai/text-embedding-3-small");
}

#[tokio::test]
async fn test_api_client_orders_by_index_field() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.4, 0.5, 0.6] },
                { "index": 0, "embedding": [0.1, 0.2, 0.3] }
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let embeddings = client.embed(&texts(&["a", "b"])).await.unwrap();
    assert_eq!(embeddings[0], vec![0.1, 0.2, 0.3]);
    assert_eq!(embeddings[1], vec![0.4, 0.5, 0.6]);
}

// =============================================================================
// Backend: single-attempt error classification
// =============================================================================

#[tokio::test]
async fn test_api_client_rate_limit_is_retryable_with_hint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({ "error": "rate limited" }))
                .insert_header("retry-after", "7"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let err = client.embed(&texts(&["test"])).await.unwrap_err();
    assert!(matches!(
        err,
        RagError::EmbeddingRateLimit {
            retry_after: Some(7)
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_api_client_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let err = client.embed(&texts(&["test"])).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_api_client_auth_error_is_not_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let err = client.embed(&texts(&["test"])).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { retryable: false, .. }));
}

#[tokio::test]
async fn test_api_client_malformed_body_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = EmbeddingApiClient::new(test_config(&mock_server.uri())).unwrap();
    let err = client.embed(&texts(&["test"])).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { retryable: true, .. }));
}

// =============================================================================
// Gateway: retry
// =============================================================================

#[tokio::test]
async fn test_gateway_retries_rate_limit_then_succeeds() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with({
            let count = Arc::clone(&attempt_count);
            move |_: &wiremock::Request| {
                let attempt = count.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    ResponseTemplate::new(429).set_body_json(json!({ "error": "rate limited" }))
                } else {
                    ResponseTemplate::new(200)
                        .set_body_json(embedding_response(vec![vec![0.1, 0.2, 0.3]]))
                }
            }
        })
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 3);
    let result = gateway.embed(&texts(&["test"])).await;

    assert!(result.is_ok(), "Should succeed after retry");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gateway_exhausts_retries_and_surfaces_service_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 3);
    let err = gateway.embed(&texts(&["test"])).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { .. }));
}

#[tokio::test]
async fn test_gateway_rate_limit_exhaustion_maps_to_service_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 2);
    let err = gateway.embed(&texts(&["test"])).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { retryable: true, .. }));
}

#[tokio::test]
async fn test_gateway_does_not_retry_auth_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 3);
    assert!(gateway.embed(&texts(&["test"])).await.is_err());
}

#[tokio::test]
async fn test_gateway_retries_partial_batch_as_a_whole() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));

    // First response is short one vector; the retry returns the full batch.
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_json(json!({
            "model": "text-embedding-3-small",
            "input": ["a", "b"]
        })))
        .respond_with({
            let count = Arc::clone(&attempt_count);
            move |_: &wiremock::Request| {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(200)
                        .set_body_json(embedding_response(vec![vec![0.1, 0.2, 0.3]]))
                } else {
                    ResponseTemplate::new(200).set_body_json(embedding_response(vec![
                        vec![0.1, 0.2, 0.3],
                        vec![0.4, 0.5, 0.6],
                    ]))
                }
            }
        })
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 3);
    let vectors = gateway.embed(&texts(&["a", "b"])).await.unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
}

#[tokio::test]
async fn test_gateway_rejects_wrong_dimensions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(embedding_response(vec![vec![0.1, 0.2]])),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 2);
    let err = gateway.embed(&texts(&["a"])).await.unwrap_err();
    assert!(err.to_string().contains("dimension"));
}

// =============================================================================
// Gateway: batching, ordering, caching
// =============================================================================

#[tokio::test]
async fn test_gateway_batches_and_preserves_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_json(json!({ "model": "text-embedding-3-small", "input": ["a", "b"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_response(vec![
            vec![1.0, 0.0, 0.0],
            vec![2.0, 0.0, 0.0],
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_json(json!({ "model": "text-embedding-3-small", "input": ["c"] })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(embedding_response(vec![vec![3.0, 0.0, 0.0]])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 1).with_batch_size(2);
    let vectors = gateway.embed(&texts(&["a", "b", "c", "a"])).await.unwrap();

    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, vec![1.0, 2.0, 3.0, 1.0]);
}

#[tokio::test]
async fn test_gateway_cache_avoids_second_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(embedding_response(vec![vec![0.1, 0.2, 0.3]])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = EmbeddingCache::new(16, Duration::from_secs(60));
    let gateway = gateway_for(&mock_server, 1).with_cache(cache.clone());

    let first = gateway.embed_one("APT29 persistence").await.unwrap();
    let second = gateway.embed_one("APT29 persistence").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_gateway_empty_input_makes_no_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server, 3);
    assert!(gateway.embed(&[]).await.unwrap().is_empty());
}
