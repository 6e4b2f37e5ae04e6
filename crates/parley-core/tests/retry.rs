//! Integration tests for retries of transient HTTP failures.
//!
//! Tests use a 1ms backoff unless they need time to change the mocked response between attempts.

use std::time::Duration;

use httpmock::prelude::*;
use parley_core::{
    client::CompletionClient,
    completion::{ChatModel, CompletionError, Prompt},
    http_client::retry::{Backoff, RetryConfig},
    providers::anthropic,
};
use serde_json::json;

fn model_with_backoff(
    server: &MockServer,
    retry: RetryConfig,
    delay: Duration,
) -> anthropic::CompletionModel {
    anthropic::ClientBuilder::new("test-key")
        .base_url(&server.base_url())
        .retry_config(retry.backoff(Backoff::new(delay, 1.0, delay)))
        .build()
        .expect("client should build")
        .completion_model(anthropic::CLAUDE_3_HAIKU)
}

fn model(server: &MockServer, retry: RetryConfig) -> anthropic::CompletionModel {
    model_with_backoff(server, retry, Duration::from_millis(1))
}

fn error_body(kind: &str, message: &str) -> serde_json::Value {
    json!({"type": "error", "error": {"type": kind, "message": message}})
}

fn assert_status(error: &CompletionError, expected: u16) {
    match error {
        CompletionError::ProviderError { status, .. } => assert_eq!(status.as_u16(), expected),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn listed_client_error_is_retried_until_attempts_run_out() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(429)
                .header("content-type", "application/json")
                .json_body(error_body("rate_limit_error", "Number of requests has exceeded your rate limit"));
        })
        .await;

    let model = model(
        &server,
        RetryConfig::default().max_attempts(3).on_http_codes([429]),
    );
    let error = model
        .call(Prompt::new("Hello"))
        .await
        .expect_err("call should fail");

    assert_status(&error, 429);
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn rate_limited_call_succeeds_once_the_limit_lifts() {
    let server = MockServer::start_async().await;
    let mut rate_limited = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(429)
                .header("content-type", "application/json")
                .json_body(error_body("rate_limit_error", "Slow down"));
        })
        .await;

    let model = model_with_backoff(
        &server,
        RetryConfig::default().max_attempts(5).on_http_codes([429]),
        Duration::from_millis(500),
    );
    let call = tokio::spawn(async move { model.call(Prompt::new("Hello")).await });

    while rate_limited.hits_async().await == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    rate_limited.delete_async().await;

    let ok = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": "msg_01RateLimited",
                    "type": "message",
                    "role": "assistant",
                    "model": anthropic::CLAUDE_3_HAIKU,
                    "content": [{"type": "text", "text": "Hi!"}],
                    "stop_reason": "end_turn",
                    "stop_sequence": null,
                    "usage": {"input_tokens": 8, "output_tokens": 3}
                }));
        })
        .await;

    let response = call
        .await
        .expect("task should not panic")
        .expect("call should succeed after the retry");

    assert_eq!(response.text(), Some("Hi!"));
    ok.assert_hits_async(1).await;
}

#[tokio::test]
async fn server_errors_are_retried_by_default() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(503)
                .header("content-type", "application/json")
                .json_body(error_body("overloaded_error", "Overloaded"));
        })
        .await;

    let model = model(&server, RetryConfig::default().max_attempts(2));
    let error = model
        .call(Prompt::new("Hello"))
        .await
        .expect_err("call should fail");

    assert_status(&error, 503);
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn excluded_server_error_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(501);
        })
        .await;

    let model = model(
        &server,
        RetryConfig::default()
            .max_attempts(3)
            .exclude_on_http_codes([501]),
    );
    let error = model
        .call(Prompt::new("Hello"))
        .await
        .expect_err("call should fail");

    assert_status(&error, 501);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn client_errors_are_not_retried_by_default() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(400)
                .header("content-type", "application/json")
                .json_body(error_body("invalid_request_error", "messages: field required"));
        })
        .await;

    let model = model(&server, RetryConfig::default().max_attempts(3));
    let error = model
        .call(Prompt::new("Hello"))
        .await
        .expect_err("call should fail");

    match &error {
        CompletionError::ProviderError { status, message } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(message, "invalid_request_error: messages: field required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn stream_connection_is_retried_until_attempts_run_out() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(429)
                .header("content-type", "application/json")
                .json_body(error_body("rate_limit_error", "Slow down"));
        })
        .await;

    let model = model(
        &server,
        RetryConfig::default().max_attempts(3).on_http_codes([429]),
    );
    let error = model
        .stream(Prompt::new("Hello"))
        .await
        .expect_err("stream should fail to connect");

    assert_status(&error, 429);
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn disabled_retries_send_a_single_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(500);
        })
        .await;

    let model = model(&server, RetryConfig::none());
    let error = model
        .call(Prompt::new("Hello"))
        .await
        .expect_err("call should fail");

    assert_status(&error, 500);
    mock.assert_hits_async(1).await;
}
