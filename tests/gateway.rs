//! Gateway endpoint integration tests
//!
//! Exercises the turn pipeline with fake STT/generation backends; no
//! network or audio hardware required.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use parley::api::{ApiState, app};
use parley::llm::Generator;
use parley::voice::Transcriber;
use parley::{Message, Result, Role};

const BOUNDARY: &str = "parley-test-boundary";

/// Transcriber that returns a fixed transcript, or fails when `None`
struct FakeTranscriber {
    transcript: Option<String>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &[u8], _content_type: &str) -> Result<String> {
        self.transcript
            .clone()
            .ok_or_else(|| parley::Error::Transcription("stt backend down".to_string()))
    }
}

/// Generator that records its input and returns a fixed reply
struct FakeGenerator {
    reply: Option<String>,
    seen: Mutex<Vec<(Vec<Message>, String)>>,
}

impl FakeGenerator {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, history: &[Message], user_text: &str) -> Result<String> {
        self.seen
            .lock()
            .unwrap()
            .push((history.to_vec(), user_text.to_string()));
        self.reply
            .clone()
            .ok_or_else(|| parley::Error::Generation("llm backend down".to_string()))
    }
}

struct TestGateway {
    app: axum::Router,
    generator: Arc<FakeGenerator>,
    staging: tempfile::TempDir,
}

fn build_gateway(transcript: Option<&str>, generator: FakeGenerator) -> TestGateway {
    let staging = tempfile::tempdir().unwrap();
    let generator = Arc::new(generator);

    let state = Arc::new(ApiState {
        transcriber: Arc::new(FakeTranscriber {
            transcript: transcript.map(ToString::to_string),
        }),
        generator: Arc::clone(&generator) as Arc<dyn Generator>,
        staging_dir: staging.path().to_path_buf(),
    });

    TestGateway {
        app: app(state),
        generator,
        staging,
    }
}

/// Assemble a multipart/form-data body by hand
fn multipart_body(audio: Option<&[u8]>, history: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();

    if let Some(bytes) = audio {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"audio\"; filename=\"clip.webm\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: audio/webm\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }

    if let Some(json) = history {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"history\"\r\n\r\n");
        body.extend_from_slice(json.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn turn_request(audio: Option<&[u8]>, history: Option<&str>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(audio, history)))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn staging_is_empty(dir: &tempfile::TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn successful_turn_returns_text_pair() {
    let gw = build_gateway(Some("Hello"), FakeGenerator::replying("Hi there"));

    let response = gw
        .app
        .oneshot(turn_request(Some(b"fake-webm-bytes"), Some("[]")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["user"], "Hello");
    assert_eq!(json["bot"], "Hi there");

    // The generator saw the empty history and the transcript
    let seen = gw.generator.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0.is_empty());
    assert_eq!(seen[0].1, "Hello");

    assert!(staging_is_empty(&gw.staging));
}

#[tokio::test]
async fn history_snapshot_is_forwarded_in_order() {
    let gw = build_gateway(Some("And now?"), FakeGenerator::replying("Still fine"));

    let history = serde_json::json!([
        {"role": "user", "content": "Hello"},
        {"role": "assistant", "content": "Hi there"},
    ])
    .to_string();

    let response = gw
        .app
        .oneshot(turn_request(Some(b"fake-webm-bytes"), Some(&history)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = gw.generator.seen.lock().unwrap();
    let (forwarded, user_text) = &seen[0];
    assert_eq!(forwarded.len(), 2);
    assert_eq!(forwarded[0].role, Role::User);
    assert_eq!(forwarded[0].content, "Hello");
    assert_eq!(forwarded[1].role, Role::Assistant);
    assert_eq!(user_text, "And now?");
}

#[tokio::test]
async fn missing_audio_is_a_client_error() {
    let gw = build_gateway(Some("unused"), FakeGenerator::replying("unused"));

    let response = gw
        .app
        .oneshot(turn_request(None, Some("[]")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "No audio file uploaded.");

    // Nothing reached the backends
    assert!(gw.generator.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_audio_field_counts_as_missing() {
    let gw = build_gateway(Some("unused"), FakeGenerator::replying("unused"));

    let response = gw
        .app
        .oneshot(turn_request(Some(b""), Some("[]")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transcription_failure_is_generic_and_leaves_no_staging_artifact() {
    let gw = build_gateway(None, FakeGenerator::replying("unused"));

    let response = gw
        .app
        .oneshot(turn_request(Some(b"fake-webm-bytes"), Some("[]")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["error"], "An error occurred during the chat process.");

    // The staging file was cleaned up despite the failure, and the
    // generator was never invoked
    assert!(staging_is_empty(&gw.staging));
    assert!(gw.generator.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn generation_failure_is_indistinguishable_on_the_wire() {
    let gw = build_gateway(Some("Hello"), FakeGenerator::failing());

    let response = gw
        .app
        .oneshot(turn_request(Some(b"fake-webm-bytes"), Some("[]")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["error"], "An error occurred during the chat process.");
    assert!(staging_is_empty(&gw.staging));
}

#[tokio::test]
async fn malformed_history_is_an_internal_error() {
    let gw = build_gateway(Some("Hello"), FakeGenerator::replying("unused"));

    let response = gw
        .app
        .oneshot(turn_request(Some(b"fake-webm-bytes"), Some("not json")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["error"], "An error occurred during the chat process.");
}

#[tokio::test]
async fn response_shape_is_never_mixed() {
    // Success carries exactly user+bot; failure carries exactly error
    let gw = build_gateway(Some("Hello"), FakeGenerator::replying("Hi there"));
    let ok = gw
        .app
        .oneshot(turn_request(Some(b"bytes"), Some("[]")))
        .await
        .unwrap();
    let ok_json = json_body(ok).await;
    assert!(ok_json["user"].is_string());
    assert!(ok_json["bot"].is_string());
    assert!(ok_json.get("error").is_none());

    let gw = build_gateway(None, FakeGenerator::replying("unused"));
    let err = gw
        .app
        .oneshot(turn_request(Some(b"bytes"), Some("[]")))
        .await
        .unwrap();
    let err_json = json_body(err).await;
    assert!(err_json["error"].is_string());
    assert!(err_json.get("user").is_none());
    assert!(err_json.get("bot").is_none());
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let gw = build_gateway(Some("unused"), FakeGenerator::replying("unused"));

    let response = gw
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}
