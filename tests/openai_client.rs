//! OpenAiClient against a mock chat-completions endpoint.
//!
//! The client blocks on its own runtime, so the mock server is started on a
//! separate runtime and the client is called from plain test threads.

use batchprompt::{Backend, BatchConfig, InferenceClient, InferenceError, OpenAiClient};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 42, "completion_tokens": 8, "total_tokens": 50 }
    })
}

fn openai_config(base_url: &str) -> BatchConfig {
    BatchConfig::new("gpt-4o-mini")
        .with_backend(Backend::OpenAI)
        .with_base_url(base_url)
        .with_api_key("test-key")
        .with_request_timeout(Duration::from_secs(10))
}

#[test]
fn test_successful_completion() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "Output_Fields will be [Grade]" },
                    { "role": "user", "content": " 1\tbenign ." }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                "```json\n{\"Grade\": \"1\"}\n```",
            )))
            .expect(1)
            .mount(&server),
    );

    let client = OpenAiClient::openai(openai_config(&server.uri())).unwrap();
    let completion = client
        .complete("Output_Fields will be [Grade]", " 1\tbenign .")
        .unwrap();

    assert_eq!(completion.content, "```json\n{\"Grade\": \"1\"}\n```");
    assert_eq!(completion.usage.input_tokens, 42);
    assert_eq!(completion.usage.output_tokens, 8);
}

#[test]
fn test_service_rejection_is_request_rejected() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "The response was filtered due to the prompt triggering content management policy.",
                    "type": null,
                    "param": "prompt",
                    "code": "content_filter"
                }
            })))
            .mount(&server),
    );

    let client = OpenAiClient::openai(openai_config(&server.uri())).unwrap();
    let err = client.complete("system", " row .").unwrap_err();

    match err {
        InferenceError::Rejected(cause) => assert!(cause.contains("content management policy")),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn test_rate_limit_is_rejected_without_retrying() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "Requests to the ChatCompletions_Create Operation have exceeded call rate limit.",
                    "type": "requests",
                    "param": null,
                    "code": "429"
                }
            })))
            .expect(1)
            .mount(&server),
    );

    let config = openai_config(&server.uri()).with_request_timeout(Duration::from_secs(30));
    let client = OpenAiClient::openai(config).unwrap();
    let err = client.complete("system", " row .").unwrap_err();

    match err {
        InferenceError::Rejected(cause) => assert!(cause.contains("exceeded call rate limit")),
        other => panic!("expected rejection, got {:?}", other),
    }
    rt.block_on(server.verify());
}

#[test]
fn test_unreachable_endpoint_is_transport_failure() {
    let client = OpenAiClient::openai(openai_config("http://127.0.0.1:1")).unwrap();
    let err = client.complete("system", " row .").unwrap_err();
    assert!(matches!(err, InferenceError::Transport(_)));
}

#[test]
fn test_slow_response_times_out() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("{}"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server),
    );

    let config = openai_config(&server.uri()).with_request_timeout(Duration::from_millis(200));
    let client = OpenAiClient::openai(config).unwrap();
    let err = client.complete("system", " row .").unwrap_err();

    match err {
        InferenceError::Transport(cause) => assert!(cause.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
}
