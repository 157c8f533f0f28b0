//! Local synthesis through Piper.
//!
//! Piper has no SSML support, so the markup is reduced to its text. Synthesis
//! runs on a worker thread that resamples each produced chunk to the output
//! rate and pushes it into a [`PcmPipe`] as 16-bit LE PCM. `synthesize` returns
//! as soon as the first bytes land.
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::error::{Result, SpeechError};
use crate::provider::{
    ssml_to_text, CancellationDetails, CancellationHandler, CancellationHub, SpeechProvider,
    SynthesisResult,
};
use crate::stream::PcmPipe;
use crate::wav::encode_pcm16le;

/// Piper-backed [`SpeechProvider`].
pub struct PiperProvider {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    model_rate: u32,
    output_rate: u32,
    start_timeout: Duration,
    stall_timeout: Duration,
    hub: CancellationHub,
}

impl std::fmt::Debug for PiperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperProvider")
            .field("synth", &"<PiperSpeechSynthesizer>")
            .field("model_rate", &self.model_rate)
            .field("output_rate", &self.output_rate)
            .finish()
    }
}

impl PiperProvider {
    /// Load a voice from its `*.onnx.json` config.
    pub fn from_config_path<P: AsRef<Path>>(
        cfg_path: P,
        output_rate: u32,
        start_timeout: Duration,
        stall_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let model_rate = read_sample_rate(&cfg_path)?;
        let model = piper_rs::from_config_path(cfg_path.as_ref())
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)?;
        info!(
            target = "speech",
            config = %cfg_path.as_ref().display(),
            model_rate,
            output_rate,
            "Loaded Piper voice"
        );
        Ok(Self {
            synth: Arc::new(RwLock::new(synth)),
            model_rate,
            output_rate,
            start_timeout,
            stall_timeout,
            hub: CancellationHub::new(),
        })
    }
}

/// Read `audio.sample_rate` from a Piper model config.
fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path.as_ref())
        .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

    let sample_rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

    Ok(sample_rate as u32)
}

/// Linear-interpolation resampler for one chunk.
pub(crate) fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let step = from as f64 / to as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Record `details` as the session's cancellation unless one is already
/// recorded. `Ok` means the caller owns the report and must raise it; `Err`
/// carries the earlier one.
fn claim_cancellation(
    slot: &Mutex<Option<CancellationDetails>>,
    details: CancellationDetails,
) -> std::result::Result<CancellationDetails, CancellationDetails> {
    let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
    match &*slot {
        Some(existing) => Err(existing.clone()),
        None => {
            *slot = Some(details.clone());
            Ok(details)
        }
    }
}

impl SpeechProvider for PiperProvider {
    fn synthesize(&self, markup: &str) -> Result<SynthesisResult> {
        let text = ssml_to_text(markup);
        let pipe = Arc::new(PcmPipe::new(self.stall_timeout));
        let failure: Arc<Mutex<Option<CancellationDetails>>> = Arc::new(Mutex::new(None));

        let synth = Arc::clone(&self.synth);
        let writer = Arc::clone(&pipe);
        let hub = self.hub.clone();
        let failed = Arc::clone(&failure);
        let (from, to) = (self.model_rate, self.output_rate);

        thread::Builder::new()
            .name("piper-synth".into())
            .spawn(move || {
                let outcome = (|| -> anyhow::Result<()> {
                    let synth = synth
                        .read()
                        .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;
                    let iter: PiperSpeechStreamParallel = synth
                        .synthesize_parallel(text, None)
                        .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;
                    let mut bytes = Vec::new();
                    for part in iter {
                        let samples = part
                            .map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                            .into_vec();
                        bytes.clear();
                        encode_pcm16le(&resample_linear(&samples, from, to), &mut bytes);
                        writer.write(&bytes);
                    }
                    Ok(())
                })();

                if let Err(e) = outcome {
                    let details = CancellationDetails::error(format!("{e:#}"));
                    // A start timeout may already have reported this session.
                    if let Ok(details) = claim_cancellation(&failed, details) {
                        hub.raise(&details);
                    }
                }
                writer.finish();
                debug!(target = "speech", bytes = writer.total_written(), "Piper worker done");
            })?;

        if !pipe.wait_started(self.start_timeout) {
            if pipe.is_finished() {
                let recorded = failure.lock().unwrap_or_else(|p| p.into_inner()).clone();
                if let Some(details) = recorded {
                    return Err(SpeechError::Canceled(details.to_string()));
                }
            } else {
                let timeout = CancellationDetails::error(format!(
                    "no audio within {} ms",
                    self.start_timeout.as_millis()
                ));
                return match claim_cancellation(&failure, timeout) {
                    Ok(details) => {
                        pipe.finish();
                        self.hub.raise(&details);
                        Err(SpeechError::Canceled(details.to_string()))
                    }
                    Err(existing) => Err(SpeechError::Canceled(existing.to_string())),
                };
            }
        }

        Ok(SynthesisResult::new(pipe))
    }

    fn on_canceled(&self, handler: CancellationHandler) {
        self.hub.subscribe(handler);
    }
}
