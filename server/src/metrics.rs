// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use speech_core::PlaybackSnapshot;

/// Latency samples kept for percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-route latency and error counters
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    request_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES))),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for speech sessions
#[derive(Debug, Clone, Default)]
pub struct SpeechMetrics {
    clicks_dispatched: Arc<AtomicU64>,
    unknown_buttons: Arc<AtomicU64>,
    wav_renders: Arc<AtomicU64>,
    rendered_samples: Arc<AtomicU64>,
}

impl SpeechMetrics {
    pub fn record_dispatch(&self) {
        self.clicks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_button(&self) {
        self.unknown_buttons.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wav_render(&self, samples: usize) {
        self.wav_renders.fetch_add(1, Ordering::Relaxed);
        self.rendered_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SpeechStats {
        SpeechStats {
            clicks_dispatched: self.clicks_dispatched.load(Ordering::Relaxed),
            unknown_buttons: self.unknown_buttons.load(Ordering::Relaxed),
            wav_renders: self.wav_renders.load(Ordering::Relaxed),
            rendered_samples: self.rendered_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub click: EndpointMetrics,
    pub speak: EndpointMetrics,
    pub wav: EndpointMetrics,
    pub speech: SpeechMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub speech: SpeechStats,
    pub playback: PlaybackSnapshot,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub request_count: u64,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub click: EndpointStats,
    pub speak: EndpointStats,
    pub wav: EndpointStats,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SpeechStats {
    pub clicks_dispatched: u64,
    pub unknown_buttons: u64,
    pub wav_renders: u64,
    pub rendered_samples: u64,
}
