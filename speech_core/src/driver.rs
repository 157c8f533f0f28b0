//! Synthesis request driver.
//!
//! One call to [`SynthesisDriver::synthesize`] is one session: claim the busy
//! flag, build the SSML, block on the provider, hand the byte stream to a fresh
//! [`StreamRenderer`] and start the sink. The result handle is dropped and the
//! busy flag cleared when the call returns, whatever the outcome.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Result, SpeechError};
use crate::provider::{SpeechProvider, SynthesisRequest, VoiceProfile};
use crate::renderer::StreamRenderer;
use crate::sink::{AudioSink, ClipSpec};
use crate::state::{BusyGuard, PlaybackState};

/// Playback parameters for every session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal clip length; the real length is unknown until the stream ends.
    pub capacity_secs: u32,
    /// Pause after the last audio before requesting a stop.
    pub drain_delay: Duration,
    /// How long a reader waits on a silent provider before giving up.
    pub stall_timeout: Duration,
    /// How long `synthesize` waits for the provider's first bytes.
    pub start_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            capacity_secs: 600,
            drain_delay: Duration::from_millis(200),
            stall_timeout: Duration::from_secs(5),
            start_timeout: Duration::from_secs(30),
        }
    }
}

impl PlaybackConfig {
    pub fn clip(&self) -> ClipSpec {
        ClipSpec {
            name: "Speech".to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            max_samples: self.sample_rate as u64 * self.capacity_secs as u64,
            streaming: true,
        }
    }
}

pub struct SynthesisDriver {
    provider: Arc<dyn SpeechProvider>,
    sink: Arc<dyn AudioSink>,
    state: Arc<PlaybackState>,
    voice: VoiceProfile,
    config: PlaybackConfig,
}

impl SynthesisDriver {
    /// Build a driver and route the provider's cancellation events into the
    /// shared status message.
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        sink: Arc<dyn AudioSink>,
        state: Arc<PlaybackState>,
        voice: VoiceProfile,
        config: PlaybackConfig,
    ) -> Self {
        let status = Arc::clone(&state);
        provider.on_canceled(Arc::new(move |details| {
            status.set_status(details.status_message());
        }));
        Self {
            provider,
            sink,
            state,
            voice,
            config,
        }
    }

    pub fn state(&self) -> &Arc<PlaybackState> {
        &self.state
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Click handler entry point. Every outcome is published through the
    /// status message; the result is handed back for callers that also want
    /// to react to it.
    pub fn speak_on_click(&self, text: &str) -> Result<()> {
        let outcome = self.synthesize(text);
        match &outcome {
            Ok(()) => {}
            // The cancellation handler already published the details.
            Err(SpeechError::Canceled(_)) => {}
            Err(SpeechError::Busy) => {
                warn!(target = "speech", "Click ignored, synthesis already in flight");
                self.state
                    .set_status("Speech synthesis already in progress, please wait.");
            }
            Err(e) => {
                error!(target = "speech", "Speech synthesis failed: {e}");
                self.state.set_status(format!("Speech synthesis failed: {e}"));
            }
        }
        outcome
    }

    /// Run one session and start playback. Blocks until the provider has
    /// produced its first audio or failed.
    pub fn synthesize(&self, text: &str) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.state).ok_or(SpeechError::Busy)?;

        let request = SynthesisRequest::new(text, self.voice.clone());
        let markup = request.to_ssml();
        let started_at = Instant::now();
        info!(target = "speech", chars = text.chars().count(), voice = %self.voice.voice, "Synthesis requested");

        let result = self.provider.synthesize(&markup)?;
        // Starts a new session, so a stop raised late by the previous
        // renderer cannot cut this one short.
        let renderer = StreamRenderer::new(
            result.audio_stream(),
            Arc::clone(&self.state),
            started_at,
            self.config.drain_delay,
        );

        self.sink.play(self.config.clip(), Box::new(renderer))?;
        info!(
            target = "speech",
            setup_ms = started_at.elapsed().as_millis() as u64,
            "Playback started"
        );
        Ok(())
    }

    /// Run [`speak_on_click`](Self::speak_on_click) on the blocking pool so an
    /// async caller is not held up by synthesis.
    pub fn spawn_speak(self: &Arc<Self>, text: impl Into<String>) -> JoinHandle<Result<()>> {
        let driver = Arc::clone(self);
        let text = text.into();
        tokio::task::spawn_blocking(move || driver.speak_on_click(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::renderer::AudioSource;
    use std::sync::Mutex;

    /// Sink that keeps the source so tests can pull from it by hand.
    #[derive(Default)]
    struct CaptureSink {
        source: Mutex<Option<(ClipSpec, Box<dyn AudioSource>)>>,
        stops: Mutex<usize>,
    }

    impl AudioSink for CaptureSink {
        fn play(&self, clip: ClipSpec, source: Box<dyn AudioSource>) -> Result<()> {
            *self.source.lock().unwrap() = Some((clip, source));
            Ok(())
        }

        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }

        fn is_playing(&self) -> bool {
            self.source.lock().unwrap().is_some()
        }
    }

    fn quick_config() -> PlaybackConfig {
        PlaybackConfig {
            drain_delay: Duration::ZERO,
            ..PlaybackConfig::default()
        }
    }

    fn driver(provider: Arc<StaticProvider>, sink: Arc<CaptureSink>) -> SynthesisDriver {
        SynthesisDriver::new(
            provider,
            sink,
            Arc::new(PlaybackState::new()),
            VoiceProfile::default(),
            quick_config(),
        )
    }

    #[test]
    fn default_clip_reserves_ten_minutes() {
        let clip = PlaybackConfig::default().clip();
        assert_eq!(clip.sample_rate, 24_000);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.max_samples, 24_000 * 600);
        assert!(clip.streaming);
    }

    #[test]
    fn session_plays_stream_and_clears_busy() {
        let provider = Arc::new(StaticProvider::audio(vec![0x00, 0x40, 0x00, 0xC0]));
        let sink = Arc::new(CaptureSink::default());
        let d = driver(Arc::clone(&provider), Arc::clone(&sink));

        d.speak_on_click("Hello").unwrap();
        assert!(!d.state().is_busy());
        assert!(provider.requests()[0].contains(">Hello</mstts:express-as>"));

        let mut guard = sink.source.lock().unwrap();
        let (clip, source) = guard.as_mut().unwrap();
        assert_eq!(clip.name, "Speech");
        let mut out = [1.0f32; 4];
        source.fill_block(&mut out);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
        assert!(d.state().status().starts_with("Speech synthesis succeeded!"));
        source.fill_block(&mut out);
        assert!(d.state().stop_requested());
    }

    #[test]
    fn cancellation_publishes_status_and_skips_playback() {
        let provider = Arc::new(StaticProvider::unavailable("quota exceeded"));
        let sink = Arc::new(CaptureSink::default());
        let d = driver(provider, Arc::clone(&sink));

        assert!(matches!(d.speak_on_click("Hello"), Err(SpeechError::Canceled(_))));
        assert_eq!(
            d.state().status(),
            "CANCELED:\nReason=[Error]\nErrorDetails=[quota exceeded]\nDid you update the subscription info?"
        );
        assert!(!d.state().is_busy());
        assert!(!sink.is_playing());
    }

    #[test]
    fn overlapping_click_is_rejected() {
        let provider = Arc::new(StaticProvider::audio(vec![0; 4]));
        let sink = Arc::new(CaptureSink::default());
        let d = driver(provider, Arc::clone(&sink));

        assert!(d.state().try_begin());
        assert!(matches!(d.synthesize("Hi"), Err(SpeechError::Busy)));
        assert!(d.state().is_busy());
        assert!(matches!(d.speak_on_click("Hi"), Err(SpeechError::Busy)));
        assert!(d.state().status().contains("already in progress"));
        // Rejected clicks leave the running session's claim in place.
        assert!(d.state().is_busy());
        assert!(matches!(d.synthesize("Hi"), Err(SpeechError::Busy)));
        assert!(!sink.is_playing());
        d.state().finish();

        d.speak_on_click("Hi").unwrap();
        assert!(sink.is_playing());
    }

    #[test]
    fn late_stop_from_previous_session_is_ignored() {
        let provider = Arc::new(StaticProvider::audio(vec![0x00, 0x40]));
        let sink = Arc::new(CaptureSink::default());
        let d = driver(provider, Arc::clone(&sink));

        d.speak_on_click("First").unwrap();
        let (_, mut first) = sink.source.lock().unwrap().take().unwrap();
        let mut out = [0.0f32; 4];
        first.fill_block(&mut out);

        // Second click lands while the first renderer is still draining.
        d.speak_on_click("Second").unwrap();
        first.fill_block(&mut out);
        assert!(!d.state().stop_requested());

        let mut guard = sink.source.lock().unwrap();
        let (_, second) = guard.as_mut().unwrap();
        second.fill_block(&mut out);
        assert!(!d.state().stop_requested());
        second.fill_block(&mut out);
        assert!(d.state().take_stop_request());
        second.fill_block(&mut out);
        assert!(!d.state().stop_requested());
    }

    #[tokio::test]
    async fn spawn_speak_runs_off_the_async_thread() {
        let provider = Arc::new(StaticProvider::audio(vec![0; 8]));
        let sink = Arc::new(CaptureSink::default());
        let d = Arc::new(driver(provider, Arc::clone(&sink)));
        d.spawn_speak("Hello").await.unwrap().unwrap();
        assert!(sink.is_playing());
    }
}
