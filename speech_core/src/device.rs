//! Audio output through the default `cpal` device.
//!
//! `cpal::Stream` is not `Send` on every host, so the stream lives on a
//! dedicated control thread and the sink talks to it over a channel. The data
//! callback pulls mono blocks at the clip rate from the registered source and
//! stretches them onto the device's rate and channel layout.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SpeechError};
use crate::renderer::AudioSource;
use crate::sink::{AudioSink, ClipSpec};

enum Command {
    Play {
        clip: ClipSpec,
        source: Box<dyn AudioSource>,
        reply: Sender<Result<()>>,
    },
    Stop,
    Shutdown,
}

/// Maps a mono source at the clip rate onto interleaved device frames.
struct RateAdapter {
    source: Box<dyn AudioSource>,
    step: f64,
    carry: f64,
    channels: usize,
    max_samples: u64,
    played: Arc<AtomicU64>,
    mono: Vec<f32>,
}

impl RateAdapter {
    fn render(&mut self, data: &mut [f32]) {
        let frames = data.len() / self.channels.max(1);
        if frames == 0 {
            data.fill(0.0);
            return;
        }

        // Source samples owed for this callback, keeping the fractional rest.
        let exact = frames as f64 * self.step + self.carry;
        let mut wanted = exact.floor() as usize;
        self.carry = exact - wanted as f64;

        let played = self.played.load(Ordering::Relaxed);
        let remaining = self.max_samples.saturating_sub(played) as usize;
        wanted = wanted.min(remaining);

        if self.mono.len() < wanted {
            self.mono.resize(wanted, 0.0);
        }
        if wanted > 0 {
            self.source.fill_block(&mut self.mono[..wanted]);
            self.played.fetch_add(wanted as u64, Ordering::Relaxed);
        }

        for (i, frame) in data.chunks_mut(self.channels).enumerate() {
            let sample = if wanted == 0 {
                0.0
            } else {
                self.mono[(i * wanted / frames).min(wanted - 1)]
            };
            frame.fill(sample);
        }
    }
}

/// [`AudioSink`] backed by the host's default output device.
pub struct CpalSink {
    commands: Mutex<Sender<Command>>,
    playing: Arc<AtomicBool>,
    played: Arc<AtomicU64>,
}

impl CpalSink {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Command>();
        let playing = Arc::new(AtomicBool::new(false));
        let played = Arc::new(AtomicU64::new(0));
        let flag = Arc::clone(&playing);
        let counter = Arc::clone(&played);

        thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || {
                let mut stream: Option<cpal::Stream> = None;
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Play { clip, source, reply } => {
                            stream = None;
                            counter.store(0, Ordering::Relaxed);
                            let built = open_stream(&clip, source, Arc::clone(&counter));
                            let outcome = built.map(|s| {
                                stream = Some(s);
                                flag.store(true, Ordering::Release);
                            });
                            let _ = reply.send(outcome);
                        }
                        Command::Stop => {
                            if let Some(s) = stream.take() {
                                if let Err(e) = s.pause() {
                                    warn!(target = "speech", "Pausing output stream failed: {e}");
                                }
                            }
                            flag.store(false, Ordering::Release);
                        }
                        Command::Shutdown => break,
                    }
                }
                debug!(target = "speech", "Output control thread exiting");
            })?;

        Ok(Self {
            commands: Mutex::new(tx),
            playing,
            played,
        })
    }

    pub fn played_samples(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .send(cmd)
            .map_err(|_| SpeechError::Sink("output thread has exited".into()))
    }
}

fn open_stream(
    clip: &ClipSpec,
    source: Box<dyn AudioSource>,
    played: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SpeechError::Sink("No audio output device available".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| SpeechError::Sink(format!("Failed to get default output config: {e}")))?;

    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(SpeechError::Sink(format!(
            "Unsupported sample format: {:?}",
            supported.sample_format()
        )));
    }

    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();
    info!(
        target = "speech",
        clip_rate = clip.sample_rate,
        device_rate,
        channels = config.channels,
        "Opening output stream"
    );

    let mut adapter = RateAdapter {
        source,
        step: clip.sample_rate as f64 / device_rate as f64,
        carry: 0.0,
        channels: config.channels as usize,
        max_samples: clip.max_samples,
        played,
        mono: Vec::new(),
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| adapter.render(data),
            |err| error!(target = "speech", "Audio stream error: {err}"),
            None,
        )
        .map_err(|e| SpeechError::Sink(format!("Failed to build audio stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SpeechError::Sink(format!("Failed to play audio stream: {e}")))?;
    Ok(stream)
}

impl AudioSink for CpalSink {
    fn play(&self, clip: ClipSpec, source: Box<dyn AudioSource>) -> Result<()> {
        let (reply, outcome) = mpsc::channel();
        self.send(Command::Play {
            clip,
            source,
            reply,
        })?;
        outcome
            .recv()
            .map_err(|_| SpeechError::Sink("output thread dropped the request".into()))?
    }

    fn stop(&self) {
        if let Err(e) = self.send(Command::Stop) {
            warn!(target = "speech", "Stop not delivered: {e}");
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.send(Command::Shutdown);
    }
}
