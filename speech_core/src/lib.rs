pub mod buttons;
pub mod driver;
pub mod error;
pub mod piper;
pub mod poller;
pub mod provider;
pub mod renderer;
pub mod sink;
pub mod state;
pub mod stream;
pub mod wav;

#[cfg(feature = "device")]
pub mod device;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

pub use buttons::{layout_buttons, load_table, parse_table, ButtonPlacement, ButtonRow, ButtonSort, Panel, Vec3};
pub use driver::{PlaybackConfig, SynthesisDriver};
pub use error::{Result, SpeechError};
pub use piper::PiperProvider;
pub use poller::StopPoller;
pub use provider::{
    CancellationDetails, CancellationReason, SpeechProvider, StaticOutcome, StaticProvider,
    SynthesisRequest, SynthesisResult, VoiceProfile,
};
pub use renderer::{AudioSource, StreamRenderer};
pub use sink::{AudioSink, ClipSpec, OfflineSink};
pub use state::{PlaybackSnapshot, PlaybackState};
pub use stream::{AudioByteStream, PcmPipe};

#[cfg(feature = "device")]
pub use device::CpalSink;

/// Buttons laid out from the table, each wired to the synthesis driver.
pub struct SpeechPanel {
    driver: Arc<SynthesisDriver>,
    buttons: Vec<ButtonPlacement>,
}

impl SpeechPanel {
    pub fn new(rows: &[ButtonRow], driver: Arc<SynthesisDriver>) -> Self {
        let buttons = layout_buttons(rows);
        info!(
            target = "speech",
            main = buttons.iter().filter(|b| b.panel == Panel::Main).count(),
            side = buttons.iter().filter(|b| b.panel == Panel::Side).count(),
            "Speech buttons created"
        );
        Self { driver, buttons }
    }

    pub fn buttons(&self) -> &[ButtonPlacement] {
        &self.buttons
    }

    pub fn button(&self, id: i64) -> Option<&ButtonPlacement> {
        self.buttons.iter().find(|b| b.id == id)
    }

    pub fn driver(&self) -> &Arc<SynthesisDriver> {
        &self.driver
    }

    /// Click the button with `id`, blocking while synthesis starts. Returns
    /// `false` when no such button exists.
    pub fn click(&self, id: i64) -> bool {
        match self.button(id) {
            Some(button) => {
                // The outcome is already in the status message.
                let _ = self.driver.speak_on_click(&button.label);
                true
            }
            None => false,
        }
    }

    /// A poller bound to this panel's state and sink.
    pub fn stop_poller(&self) -> StopPoller {
        StopPoller::new(Arc::clone(self.driver.state()), Arc::clone(self.driver.sink()))
    }
}

/// Synthesize `text` and render the whole stream without a device.
///
/// Pulls `block_len` sample blocks from a private renderer until the stream is
/// exhausted. Returns only the decoded samples, without padding.
pub fn render_offline(
    provider: &dyn SpeechProvider,
    voice: &VoiceProfile,
    text: &str,
    block_len: usize,
) -> Result<Vec<f32>> {
    let markup = SynthesisRequest::new(text, voice.clone()).to_ssml();
    let result = provider.synthesize(&markup)?;
    let state = Arc::new(PlaybackState::new());
    let mut renderer =
        StreamRenderer::new(result.audio_stream(), state, Instant::now(), Duration::ZERO);

    let mut samples = Vec::new();
    let mut block = vec![0.0f32; block_len.max(1)];
    while !renderer.is_exhausted() {
        let before = renderer.decoded_samples();
        renderer.fill_block(&mut block);
        // Decoded samples lead each block; the rest is padding.
        let fresh = (renderer.decoded_samples() - before) as usize;
        samples.extend_from_slice(&block[..fresh]);
    }
    Ok(samples)
}
