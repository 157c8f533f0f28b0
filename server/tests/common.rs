//! Common utilities for integration tests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use speech_core::{
    parse_table, wav, OfflineSink, PlaybackConfig, PlaybackState, SpeechPanel, SpeechProvider,
    StaticProvider, SynthesisDriver, VoiceProfile,
};
use speech_server::{build_router, AppState};
use tower::ServiceExt;

pub const BUTTONS_CSV: &str = "\
ID,Button Text,Sort
1,Good morning,main
2,Thank you,main
3,I need help,side
,Not a button,main
";

/// Short 16-bit tone used as synthesized audio
pub fn tone_pcm(samples: usize) -> Vec<u8> {
    let floats: Vec<f32> = (0..samples)
        .map(|i| ((i as f32) * 0.07).sin() * 0.4)
        .collect();
    let mut bytes = Vec::new();
    wav::encode_pcm16le(&floats, &mut bytes);
    bytes
}

fn app_with_provider(provider: Arc<dyn SpeechProvider>) -> (Router, AppState) {
    let config = PlaybackConfig {
        drain_delay: Duration::from_millis(10),
        ..PlaybackConfig::default()
    };
    let driver = Arc::new(SynthesisDriver::new(
        Arc::clone(&provider),
        Arc::new(OfflineSink::new(480)),
        Arc::new(PlaybackState::new()),
        VoiceProfile::default(),
        config,
    ));
    let rows = parse_table(BUTTONS_CSV).expect("fixture table parses");
    let panel = Arc::new(SpeechPanel::new(&rows, driver));
    let state = AppState::new(panel, provider, VoiceProfile::default());
    (build_router(state.clone()), state)
}

/// Create a test app instance backed by a fixed-audio provider
pub fn create_test_app() -> (Router, AppState) {
    app_with_provider(Arc::new(StaticProvider::audio(tone_pcm(1_200))))
}

/// Create a test app whose provider always cancels
pub fn create_unavailable_app() -> (Router, AppState) {
    app_with_provider(Arc::new(StaticProvider::unavailable("engine offline")))
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}
