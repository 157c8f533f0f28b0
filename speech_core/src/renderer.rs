//! Pull-based audio rendering.
//!
//! The audio engine calls [`AudioSource::fill_block`] on its real-time thread
//! whenever it needs samples. Implementations must return in bounded time and
//! must not allocate without bound.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::state::PlaybackState;
use crate::stream::AudioByteStream;
use crate::wav::{decode_block, BYTES_PER_SAMPLE};

/// A capability the audio sink pulls normalized mono samples from.
pub trait AudioSource: Send {
    /// Fill `out` completely. Silence is written where no audio is available.
    fn fill_block(&mut self, out: &mut [f32]);
}

/// Format the first-audio latency status line.
pub fn latency_message(latency: Duration) -> String {
    format!(
        "Speech synthesis succeeded!\nLatency: {} ms.",
        latency.as_secs_f64() * 1000.0
    )
}

/// Renders a 16-bit LE mono byte stream into float blocks.
///
/// Reads that end mid-sample keep the dangling byte for the next block, so
/// framing survives streams that deliver odd-sized chunks.
///
/// Constructing a renderer starts a new session on the shared state. On the
/// first exhausted read it waits `drain_delay` so the device can play out what
/// it already holds, then raises the stop request for its own session. A
/// renderer that has been superseded cannot stop its successor. Later calls
/// only write silence.
pub struct StreamRenderer {
    stream: Arc<dyn AudioByteStream>,
    state: Arc<PlaybackState>,
    session: u64,
    started_at: Instant,
    drain_delay: Duration,
    scratch: Vec<u8>,
    carry: Option<u8>,
    first_audio_seen: bool,
    exhausted: bool,
    decoded_samples: u64,
}

impl StreamRenderer {
    pub fn new(
        stream: Arc<dyn AudioByteStream>,
        state: Arc<PlaybackState>,
        started_at: Instant,
        drain_delay: Duration,
    ) -> Self {
        let session = state.begin_session();
        Self {
            stream,
            state,
            session,
            started_at,
            drain_delay,
            scratch: Vec::new(),
            carry: None,
            first_audio_seen: false,
            exhausted: false,
            decoded_samples: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Samples decoded from the stream so far, excluding padding.
    pub fn decoded_samples(&self) -> u64 {
        self.decoded_samples
    }

    fn on_exhausted(&mut self) {
        self.exhausted = true;
        info!(
            target = "speech",
            samples = self.decoded_samples,
            "Byte stream exhausted, requesting stop"
        );
        if !self.drain_delay.is_zero() {
            std::thread::sleep(self.drain_delay);
        }
        if !self.state.request_stop_for(self.session) {
            debug!(target = "speech", session = self.session, "Session superseded, stop not raised");
        }
    }
}

impl AudioSource for StreamRenderer {
    fn fill_block(&mut self, out: &mut [f32]) {
        // An empty read would look like end of stream.
        if out.is_empty() {
            return;
        }
        if self.exhausted {
            out.fill(0.0);
            return;
        }

        let wanted = out.len() * BYTES_PER_SAMPLE;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0);
        }
        // An odd byte left over from the previous read starts this block.
        let carried = match self.carry.take() {
            Some(byte) if wanted > 0 => {
                self.scratch[0] = byte;
                1
            }
            other => {
                self.carry = other;
                0
            }
        };
        let read_bytes = self.stream.read(&mut self.scratch[carried..wanted]);

        if read_bytes > 0 && !self.first_audio_seen {
            self.first_audio_seen = true;
            let latency = self.started_at.elapsed();
            debug!(target = "speech", latency_ms = latency.as_millis() as u64, "First audio chunk");
            self.state.set_status(latency_message(latency));
        }

        let available = carried + read_bytes;
        let decoded = decode_block(&self.scratch[..available], out);
        self.decoded_samples += decoded as u64;
        if available % BYTES_PER_SAMPLE == 1 && read_bytes > 0 {
            self.carry = Some(self.scratch[available - 1]);
        }

        if read_bytes == 0 {
            self.on_exhausted();
        }
    }
}
