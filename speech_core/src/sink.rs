//! Audio sink port.
//!
//! A sink accepts a clip description plus the [`AudioSource`] that feeds it and
//! starts pulling blocks on its own thread. `stop` must never be called from
//! inside `fill_block`; the stop poller does it instead.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::renderer::AudioSource;
use crate::wav;

/// Declared shape of a streaming clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipSpec {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Upper bound on samples the clip may play.
    pub max_samples: u64,
    pub streaming: bool,
}

pub trait AudioSink: Send + Sync {
    /// Replace whatever is playing with `source` and start pulling from it.
    fn play(&self, clip: ClipSpec, source: Box<dyn AudioSource>) -> Result<()>;

    fn stop(&self);

    fn is_playing(&self) -> bool;
}

struct OfflineSession {
    running: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

/// Sink without an output device.
///
/// A worker thread pulls fixed-size blocks at the clip's real-time pace and
/// keeps the samples in memory, which makes it usable on headless hosts and in
/// tests.
pub struct OfflineSink {
    block_len: usize,
    samples: Arc<Mutex<Vec<f32>>>,
    played: Arc<AtomicU64>,
    session: Mutex<Option<OfflineSession>>,
}

impl OfflineSink {
    pub fn new(block_len: usize) -> Self {
        Self {
            block_len: block_len.max(1),
            samples: Arc::new(Mutex::new(Vec::new())),
            played: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    /// Take the samples collected so far.
    pub fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Encode the collected samples as a mono WAV file without draining them.
    pub fn to_wav(&self, sample_rate: u32) -> Result<Vec<u8>> {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        wav::encode_wav(&samples, sample_rate)
    }

    /// Samples pulled from the current or last source.
    pub fn played_samples(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    fn end_session(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(session) = session {
            session.running.store(false, Ordering::Release);
            if session.worker.thread().id() != thread::current().id() {
                let _ = session.worker.join();
            }
        }
    }
}

impl Default for OfflineSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl AudioSink for OfflineSink {
    fn play(&self, clip: ClipSpec, mut source: Box<dyn AudioSource>) -> Result<()> {
        self.end_session();

        let running = Arc::new(AtomicBool::new(true));
        let samples = Arc::clone(&self.samples);
        let played = Arc::clone(&self.played);
        played.store(0, Ordering::Relaxed);
        // Only the latest session is kept.
        samples.lock().unwrap_or_else(|p| p.into_inner()).clear();
        let block_len = self.block_len;
        let block_time =
            Duration::from_secs_f64(block_len as f64 / clip.sample_rate.max(1) as f64);
        let flag = Arc::clone(&running);

        info!(target = "speech", clip = %clip.name, rate = clip.sample_rate, "Offline playback started");
        let worker = thread::Builder::new()
            .name("offline-audio".into())
            .spawn(move || {
                let mut block = vec![0.0f32; block_len];
                while flag.load(Ordering::Acquire) {
                    let done = played.load(Ordering::Relaxed);
                    if done >= clip.max_samples {
                        debug!(target = "speech", "Clip capacity reached");
                        break;
                    }
                    let len = block_len.min((clip.max_samples - done) as usize);
                    source.fill_block(&mut block[..len]);
                    samples
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .extend_from_slice(&block[..len]);
                    played.fetch_add(len as u64, Ordering::Relaxed);
                    thread::sleep(block_time);
                }
                flag.store(false, Ordering::Release);
            })?;

        *self.session.lock().unwrap_or_else(|p| p.into_inner()) =
            Some(OfflineSession { running, worker });
        Ok(())
    }

    fn stop(&self) {
        debug!(target = "speech", "Offline playback stopped");
        self.end_session();
    }

    fn is_playing(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|s| s.running.load(Ordering::Acquire))
    }
}

impl Drop for OfflineSink {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Ramp(f32);

    impl AudioSource for Ramp {
        fn fill_block(&mut self, out: &mut [f32]) {
            for s in out {
                *s = self.0;
                self.0 += 1.0;
            }
        }
    }

    fn clip(max_samples: u64) -> ClipSpec {
        ClipSpec {
            name: "test".into(),
            sample_rate: 48_000,
            channels: 1,
            max_samples,
            streaming: true,
        }
    }

    #[test]
    fn stops_at_clip_capacity() {
        let sink = OfflineSink::new(64);
        sink.play(clip(100), Box::new(Ramp(0.0))).unwrap();
        let t0 = Instant::now();
        while sink.is_playing() && t0.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        let samples = sink.take_samples();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[99], 99.0);
        assert_eq!(sink.played_samples(), 100);
    }

    #[test]
    fn collected_samples_encode_as_wav() {
        let sink = OfflineSink::new(32);
        sink.play(clip(64), Box::new(Ramp(0.0))).unwrap();
        let t0 = Instant::now();
        while sink.is_playing() && t0.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        let bytes = sink.to_wav(48_000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        // 44-byte header + 16-bit samples
        assert_eq!(bytes.len(), 44 + 64 * 2);
        assert_eq!(sink.take_samples().len(), 64);
    }

    #[test]
    fn new_session_discards_previous_samples() {
        let sink = OfflineSink::new(16);
        sink.play(clip(32), Box::new(Ramp(0.0))).unwrap();
        sink.stop();
        sink.play(clip(16), Box::new(Ramp(100.0))).unwrap();
        let t0 = Instant::now();
        while sink.is_playing() && t0.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        let samples = sink.take_samples();
        assert_eq!(samples.len(), 16);
        assert_eq!(samples[0], 100.0);
    }

    #[test]
    fn stop_ends_pulling() {
        let sink = OfflineSink::new(16);
        sink.play(clip(u64::MAX), Box::new(Ramp(0.0))).unwrap();
        thread::sleep(Duration::from_millis(10));
        sink.stop();
        assert!(!sink.is_playing());
        let n = sink.played_samples();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(sink.played_samples(), n);
    }
}
