use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use speech_core::{
    load_table, AudioSink, OfflineSink, PiperProvider, PlaybackState, SpeechPanel,
    SpeechProvider, StaticProvider, SynthesisDriver, VoiceProfile,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{info, warn};

use speech_server::config::{AudioOutput, ServerConfig};
use speech_server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn build_provider(config: &ServerConfig) -> Arc<dyn SpeechProvider> {
    let playback = config.playback();
    match &config.piper_config {
        Some(path) => match PiperProvider::from_config_path(
            path,
            playback.sample_rate,
            playback.start_timeout,
            playback.stall_timeout,
        ) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!("Could not load Piper voice {}: {e:#}. Clicks will report an error.", path.display());
                Arc::new(StaticProvider::unavailable(format!("speech engine failed to load: {e}")))
            }
        },
        None => {
            warn!("PIPER_CONFIG not set. Clicks will report an error.");
            Arc::new(StaticProvider::unavailable("no speech engine configured"))
        }
    }
}

fn build_sink(output: AudioOutput) -> anyhow::Result<Arc<dyn AudioSink>> {
    match output {
        #[cfg(feature = "device")]
        AudioOutput::Device => Ok(Arc::new(speech_core::CpalSink::new()?)),
        #[cfg(not(feature = "device"))]
        AudioOutput::Device => {
            warn!("Built without the `device` feature, using the offline sink");
            Ok(Arc::new(OfflineSink::default()))
        }
        AudioOutput::Offline => Ok(Arc::new(OfflineSink::default())),
    }
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech panel server...");

    let config = ServerConfig::from_env();

    let rows = match load_table(&config.buttons_csv) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Failed to load {}: {e}. Starting with no buttons.", config.buttons_csv.display());
            Vec::new()
        }
    };

    let provider = build_provider(&config);
    let sink = build_sink(config.audio_output)?;
    let voice = VoiceProfile::default();
    let driver = Arc::new(SynthesisDriver::new(
        Arc::clone(&provider),
        sink,
        Arc::new(PlaybackState::new()),
        voice.clone(),
        config.playback(),
    ));
    let panel = Arc::new(SpeechPanel::new(&rows, driver));
    info!("Loaded {} speech buttons", panel.buttons().len());

    // Frame-rate stop poller; the renderer only flags, this task stops the sink.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(panel.stop_poller().run(config.poll_interval(), shutdown_rx));

    let state = AppState::new(Arc::clone(&panel), provider, voice);
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, output={:?}",
        config.port, config.rate_limit_per_minute, config.audio_output
    );

    let cors = if let Some(ref allowed_origins) = config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            CorsLayer::permissive()
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::permissive()
    };

    // Global rate limit: all requests share one bucket
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second((config.rate_limit_per_minute / 60).max(1) as u64)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("Invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let app = build_router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = poller.await;
    panel.driver().sink().stop();
    Ok(())
}
