pub mod config;
pub mod error;
pub mod metrics;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use speech_core::{
    render_offline, wav, ButtonPlacement, PlaybackSnapshot, SpeechError, SpeechPanel,
    SpeechProvider, VoiceProfile,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics::{
    AppMetrics, EndpointMetricsResponse, MetricsResponse, SystemMetrics,
};
use crate::validation::{validate_block_len, validate_speak_request};

#[derive(Clone)]
pub struct AppState {
    pub panel: Arc<SpeechPanel>,
    pub provider: Arc<dyn SpeechProvider>,
    pub voice: VoiceProfile,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        panel: Arc<SpeechPanel>,
        provider: Arc<dyn SpeechProvider>,
        voice: VoiceProfile,
    ) -> Self {
        Self {
            panel,
            provider,
            voice,
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct WavQuery {
    pub block_len: Option<usize>,
}

#[derive(Serialize)]
pub struct WavResponse {
    pub audio_base64: String,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Routes plus request-id and trace layers. Rate limiting, timeouts and CORS
/// are added by the binary.
pub fn build_router(state: AppState) -> Router {
    let _ = START_TIME.get_or_init(Instant::now);

    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/buttons", get(list_buttons))
        .route("/buttons/{id}/click", post(click_button))
        .route("/buttons/{id}/wav", get(render_button_wav))
        .route("/speak", post(speak))
        .route("/status", get(playback_status));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    // A v4 UUID is always a valid header value
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_buttons(State(state): State<AppState>) -> Json<Vec<ButtonPlacement>> {
    Json(state.panel.buttons().to_vec())
}

pub async fn playback_status(State(state): State<AppState>) -> Json<PlaybackSnapshot> {
    Json(state.panel.driver().state().snapshot())
}

/// Run the click handler on the blocking pool and report the resulting status.
///
/// A click rejected because another session is in flight becomes a 409;
/// every other outcome is carried by the status message.
async fn run_click(state: &AppState, text: String) -> Result<PlaybackSnapshot, ApiError> {
    let driver = Arc::clone(state.panel.driver());
    let outcome = driver
        .spawn_speak(text)
        .await
        .map_err(|e| ApiError::InternalError(format!("Task join error: {e}")))?;
    if let Err(SpeechError::Busy) = outcome {
        return Err(SpeechError::Busy.into());
    }
    state.metrics.speech.record_dispatch();
    Ok(driver.state().snapshot())
}

pub async fn click_button(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<PlaybackSnapshot>), ApiError> {
    let start = Instant::now();
    let Some(button) = state.panel.button(id) else {
        state.metrics.speech.record_unknown_button();
        state.metrics.click.record_error();
        return Err(ApiError::NotFound(format!("No button with id {id}")));
    };
    info!("Button {} clicked: {:?}", id, button.label);
    let label = button.label.clone();

    let snapshot = run_click(&state, label).await.inspect_err(|_| {
        state.metrics.click.record_error();
    })?;
    state
        .metrics
        .click
        .record_request(start.elapsed().as_millis() as u64);
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn speak(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<(StatusCode, Json<PlaybackSnapshot>), ApiError> {
    let start = Instant::now();
    if let Err(e) = validate_speak_request(&req.text) {
        state.metrics.speak.record_error();
        return Err(e);
    }
    let snapshot = run_click(&state, req.text).await.inspect_err(|_| {
        state.metrics.speak.record_error();
    })?;
    state
        .metrics
        .speak
        .record_request(start.elapsed().as_millis() as u64);
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn render_button_wav(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WavQuery>,
) -> Result<Json<WavResponse>, ApiError> {
    let start = Instant::now();
    let block_len = query.block_len.unwrap_or(1024);
    validate_block_len(block_len)?;
    let label = state
        .panel
        .button(id)
        .map(|b| b.label.clone())
        .ok_or_else(|| ApiError::NotFound(format!("No button with id {id}")))?;

    let provider = Arc::clone(&state.provider);
    let voice = state.voice.clone();
    let sample_rate = state.panel.driver().config().sample_rate;

    // Synthesis and encoding in a single blocking task
    let rendered = tokio::task::spawn_blocking(move || {
        let samples = render_offline(provider.as_ref(), &voice, &label, block_len)?;
        let audio_base64 = wav::encode_wav_base64(&samples, sample_rate)?;
        Ok::<_, speech_core::SpeechError>((samples.len(), audio_base64))
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("Task join error: {e}")))?;

    let (samples, audio_base64) = match rendered {
        Ok(r) => r,
        Err(e) => {
            state.metrics.wav.record_error();
            warn!("WAV render for button {} failed: {}", id, e);
            return Err(e.into());
        }
    };

    state.metrics.speech.record_wav_render(samples);
    state
        .metrics
        .wav
        .record_request(start.elapsed().as_millis() as u64);

    Ok(Json(WavResponse {
        audio_base64,
        duration_ms: samples as u64 * 1000 / sample_rate.max(1) as u64,
        sample_rate,
    }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: system.used_memory() / 1024 / 1024,
            memory_total_mb: system.total_memory() / 1024 / 1024,
            request_count: state.request_count.load(Ordering::Relaxed),
            uptime_seconds: uptime,
        },
        endpoints: EndpointMetricsResponse {
            click: state.metrics.click.stats(),
            speak: state.metrics.speak.stats(),
            wav: state.metrics.wav.stats(),
        },
        speech: state.metrics.speech.stats(),
        playback: state.panel.driver().state().snapshot(),
    })
}
