// Configuration for the speech panel server

use std::path::PathBuf;
use std::time::Duration;

use speech_core::PlaybackConfig;

/// Where rendered audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutput {
    /// Default output device (needs the `device` feature)
    Device,
    /// In-memory sink paced at real time
    Offline,
}

impl AudioOutput {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "device" => Some(AudioOutput::Device),
            "offline" => Some(AudioOutput::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub buttons_csv: PathBuf,
    pub piper_config: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub drain_delay_ms: u64,
    pub audio_output: AudioOutput,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            buttons_csv: PathBuf::from("buttons.csv"),
            piper_config: None,
            poll_interval_ms: 16,
            drain_delay_ms: 200,
            audio_output: default_output(),
        }
    }
}

fn default_output() -> AudioOutput {
    if cfg!(feature = "device") {
        AudioOutput::Device
    } else {
        AudioOutput::Offline
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let piper_config = std::env::var("PIPER_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let audio_output = std::env::var("AUDIO_OUTPUT")
            .ok()
            .and_then(|v| AudioOutput::parse(&v))
            .unwrap_or(defaults.audio_output);

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins,
            buttons_csv: std::env::var("BUTTONS_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.buttons_csv),
            piper_config,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval_ms),
            drain_delay_ms: env_parse("DRAIN_DELAY_MS").unwrap_or(defaults.drain_delay_ms),
            audio_output,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            drain_delay: Duration::from_millis(self.drain_delay_ms),
            ..PlaybackConfig::default()
        }
    }
}
