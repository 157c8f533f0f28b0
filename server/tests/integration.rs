//! Integration tests for the speech panel server

mod common;

use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::Engine;
use serde_json::json;
use tower::ServiceExt;

use common::*;

#[tokio::test]
async fn test_health_check() {
    let (app, _) = create_test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_list_buttons_layout() {
    let (app, _) = create_test_app();
    let (status, body) = get_json(app, "/buttons").await;

    assert_eq!(status, StatusCode::OK);
    let buttons = body.as_array().unwrap();
    assert_eq!(buttons.len(), 3);

    assert_eq!(buttons[0]["id"], 1);
    assert_eq!(buttons[0]["label"], "Good morning");
    assert_eq!(buttons[0]["panel"], "main");
    assert_eq!(buttons[0]["position"]["x"], -418.0);
    assert_eq!(buttons[1]["position"]["x"], -218.0);

    assert_eq!(buttons[2]["panel"], "side");
    assert_eq!(buttons[2]["scale"]["x"], 4.0);
}

#[tokio::test]
async fn test_api_prefix_routes() {
    let (app, _) = create_test_app();
    let (status, body) = get_json(app, "/api/buttons").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_click_unknown_button() {
    let (app, state) = create_test_app();
    let (status, body) = post_json(app, "/buttons/99/click", json!({})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert_eq!(state.metrics.speech.stats().unknown_buttons, 1);
}

#[tokio::test]
async fn test_click_starts_playback() {
    let (app, state) = create_test_app();
    let (status, body) = post_json(app, "/buttons/1/click", json!({})).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["busy"], false);
    assert_eq!(state.metrics.speech.stats().clicks_dispatched, 1);
    assert!(state.panel.driver().sink().is_playing());

    // The renderer publishes latency once the first audio is pulled
    let deadline = Instant::now() + Duration::from_secs(5);
    let driver_state = state.panel.driver().state();
    while driver_state.status().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(driver_state
        .status()
        .starts_with("Speech synthesis succeeded!\nLatency: "));
}

#[tokio::test]
async fn test_click_while_busy_is_conflict() {
    let (app, state) = create_test_app();
    assert!(state.panel.driver().state().try_begin());

    let (status, body) = post_json(app.clone(), "/buttons/2/click", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);
    assert_eq!(
        state.panel.driver().state().status(),
        "Speech synthesis already in progress, please wait."
    );
    // The running session keeps its claim
    assert!(state.panel.driver().state().is_busy());
    assert!(!state.panel.driver().sink().is_playing());

    let (status, _) = post_json(app, "/speak", json!({ "text": "Again" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(state.metrics.speech.stats().clicks_dispatched, 0);
}

#[tokio::test]
async fn test_click_with_unavailable_engine() {
    let (app, state) = create_unavailable_app();
    let (status, body) = post_json(app, "/buttons/1/click", json!({})).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let message = body["status_message"].as_str().unwrap();
    assert!(message.starts_with("CANCELED:\nReason=[Error]"));
    assert!(message.contains("engine offline"));
    assert!(!state.panel.driver().state().is_busy());
}

#[tokio::test]
async fn test_speak_validation() {
    let (app, _) = create_test_app();
    let (status, body) = post_json(app, "/speak", json!({ "text": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));

    let (app, _) = create_test_app();
    let (status, _) = post_json(app, "/speak", json!({ "text": "a".repeat(6000) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_speak_free_text() {
    let (app, state) = create_test_app();
    let (status, _) = post_json(app, "/speak", json!({ "text": "Fish & chips" })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(state.metrics.speak.stats().request_count, 1);
}

#[tokio::test]
async fn test_status_snapshot() {
    let (app, _) = create_test_app();
    let (status, body) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stop_requested"], false);
    assert_eq!(body["busy"], false);
    assert_eq!(body["status_message"], "");
}

#[tokio::test]
async fn test_render_button_wav() {
    let (app, state) = create_test_app();
    let (status, body) = get_json(app, "/buttons/3/wav?block_len=256").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sample_rate"], 24000);
    assert_eq!(body["duration_ms"], 50);

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body["audio_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(state.metrics.speech.stats().rendered_samples, 1_200);
}

#[tokio::test]
async fn test_render_wav_rejects_bad_block_len() {
    let (app, _) = create_test_app();
    let (status, _) = get_json(app, "/buttons/1/wav?block_len=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_render_wav_canceled_is_bad_gateway() {
    let (app, state) = create_unavailable_app();
    let (status, body) = get_json(app, "/buttons/1/wav").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], 502);
    assert_eq!(state.metrics.wav.stats().error_count, 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = create_test_app();
    let (status, body) = get_json(app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["system"]["request_count"].as_u64().unwrap() >= 1);
    assert_eq!(body["speech"]["clicks_dispatched"], 0);
    assert_eq!(body["playback"]["busy"], false);
}
