//! Text-to-speech provider port.
//!
//! A provider takes SSML markup, blocks until audio is available (or synthesis
//! failed) and hands back a [`SynthesisResult`] wrapping the audio byte stream.
//! Failures are also announced out of band through cancellation handlers so that
//! status reporting does not depend on who happens to be waiting on the call.
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Result, SpeechError};
use crate::stream::{AudioByteStream, PcmPipe};

/// Voice and speaking style used to wrap request text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub language: String,
    pub voice: String,
    pub style: String,
    pub role: String,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: "en-US-JessaNeural".to_string(),
            style: "chat".to_string(),
            role: "SeniorFemale".to_string(),
        }
    }
}

/// One click's worth of text plus the voice it is spoken with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceProfile,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: VoiceProfile) -> Self {
        Self {
            text: text.into(),
            voice,
        }
    }

    /// Wrap the text in the SSML envelope.
    pub fn to_ssml(&self) -> String {
        let v = &self.voice;
        format!(
            "<speak version='1.0' xmlns='https://www.w3.org/2001/10/synthesis' \
             xmlns:mstts='https://www.w3.org/2001/mstts' xml:lang='{}'>\
             <voice name='{}'><mstts:express-as type='{}' role ='{}'>{}</mstts:express-as>\
             </voice></speak>",
            escape_xml(&v.language),
            escape_xml(&v.voice),
            escape_xml(&v.style),
            escape_xml(&v.role),
            escape_xml(&self.text),
        )
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Extract the spoken text from SSML: drop tags, resolve the five XML entities.
pub fn ssml_to_text(markup: &str) -> String {
    let mut text = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    Error,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancellationReason::Error => "Error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationDetails {
    pub reason: CancellationReason,
    pub error_details: String,
}

impl CancellationDetails {
    pub fn error(details: impl Into<String>) -> Self {
        Self {
            reason: CancellationReason::Error,
            error_details: details.into(),
        }
    }

    /// Status line shown to the user when synthesis is canceled.
    pub fn status_message(&self) -> String {
        format!(
            "CANCELED:\nReason=[{}]\nErrorDetails=[{}]\nDid you update the subscription info?",
            self.reason, self.error_details
        )
    }
}

impl fmt::Display for CancellationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.error_details)
    }
}

pub type CancellationHandler = Arc<dyn Fn(&CancellationDetails) + Send + Sync>;

/// Fan-out for cancellation events. A panicking handler is logged and skipped.
#[derive(Default, Clone)]
pub struct CancellationHub {
    handlers: Arc<Mutex<Vec<CancellationHandler>>>,
}

impl CancellationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: CancellationHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    pub fn raise(&self, details: &CancellationDetails) {
        warn!(target = "speech", reason = %details.reason, details = %details.error_details, "Synthesis canceled");
        // Clone the list so handlers may subscribe without deadlocking.
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(details))).is_err() {
                error!(target = "speech", "Cancellation handler panicked");
            }
        }
    }
}

impl fmt::Debug for CancellationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationHub").finish_non_exhaustive()
    }
}

/// Handle to one synthesis. Dropping it releases provider-side resources; the
/// byte stream itself stays readable for whoever holds a clone of it.
pub struct SynthesisResult {
    stream: Arc<dyn AudioByteStream>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl SynthesisResult {
    pub fn new(stream: Arc<dyn AudioByteStream>) -> Self {
        Self {
            stream,
            on_release: None,
        }
    }

    /// Run `release` when the result is dropped.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(release));
        self
    }

    pub fn audio_stream(&self) -> Arc<dyn AudioByteStream> {
        Arc::clone(&self.stream)
    }
}

impl Drop for SynthesisResult {
    fn drop(&mut self) {
        debug!(target = "speech", "Synthesis result released");
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl fmt::Debug for SynthesisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisResult").finish_non_exhaustive()
    }
}

pub trait SpeechProvider: Send + Sync {
    /// Submit `markup` and block until audio starts arriving or synthesis fails.
    /// A cancellation is raised to subscribers before `Canceled` is returned.
    fn synthesize(&self, markup: &str) -> Result<SynthesisResult>;

    /// Register a handler for out-of-band cancellation events.
    fn on_canceled(&self, handler: CancellationHandler);
}

/// What a [`StaticProvider`] does on each request.
#[derive(Debug, Clone)]
pub enum StaticOutcome {
    /// Serve these 16-bit LE PCM bytes.
    Audio(Vec<u8>),
    /// Cancel with these details.
    Cancel(CancellationDetails),
}

/// Provider that answers every request with a fixed outcome.
///
/// Serves as the fallback when no synthesis engine is configured and as a
/// stand-in for tests.
#[derive(Debug)]
pub struct StaticProvider {
    outcome: StaticOutcome,
    hub: CancellationHub,
    requests: Mutex<Vec<String>>,
}

impl StaticProvider {
    pub fn new(outcome: StaticOutcome) -> Self {
        Self {
            outcome,
            hub: CancellationHub::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn audio(pcm: Vec<u8>) -> Self {
        Self::new(StaticOutcome::Audio(pcm))
    }

    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(StaticOutcome::Cancel(CancellationDetails::error(details)))
    }

    /// Markup of every request seen so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SpeechProvider for StaticProvider {
    fn synthesize(&self, markup: &str) -> Result<SynthesisResult> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(markup.to_string());
        match &self.outcome {
            StaticOutcome::Audio(pcm) => Ok(SynthesisResult::new(Arc::new(PcmPipe::from_bytes(
                pcm.clone(),
            )))),
            StaticOutcome::Cancel(details) => {
                self.hub.raise(details);
                Err(SpeechError::Canceled(details.to_string()))
            }
        }
    }

    fn on_canceled(&self, handler: CancellationHandler) {
        self.hub.subscribe(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn ssml_envelope_matches_voice_profile() {
        let req = SynthesisRequest::new("Hello", VoiceProfile::default());
        let ssml = req.to_ssml();
        assert!(ssml.starts_with("<speak version='1.0'"));
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("<voice name='en-US-JessaNeural'>"));
        assert!(ssml.contains("<mstts:express-as type='chat' role ='SeniorFemale'>Hello</mstts:express-as>"));
        assert!(ssml.ends_with("</voice></speak>"));
    }

    #[test]
    fn label_text_is_escaped_and_recovered() {
        let req = SynthesisRequest::new("Tom & Jerry <3 'quotes'", VoiceProfile::default());
        let ssml = req.to_ssml();
        assert!(ssml.contains("Tom &amp; Jerry &lt;3 &apos;quotes&apos;"));
        assert_eq!(ssml_to_text(&ssml), "Tom & Jerry <3 'quotes'");
    }

    #[test]
    fn cancellation_message_format() {
        let details = CancellationDetails::error("401 Unauthorized");
        assert_eq!(
            details.status_message(),
            "CANCELED:\nReason=[Error]\nErrorDetails=[401 Unauthorized]\nDid you update the subscription info?"
        );
    }

    #[test]
    fn hub_survives_panicking_handler() {
        let hub = CancellationHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hub.subscribe(Arc::new(|_| panic!("boom")));
        let c = Arc::clone(&calls);
        hub.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        hub.raise(&CancellationDetails::error("x"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn result_release_runs_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let result = SynthesisResult::new(Arc::new(PcmPipe::from_bytes(vec![0u8; 4])))
            .with_release(move || flag.store(true, Ordering::SeqCst));
        let stream = result.audio_stream();
        drop(result);
        assert!(released.load(Ordering::SeqCst));
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf), 4);
    }

    #[test]
    fn static_provider_cancels_through_hub() {
        let provider = StaticProvider::unavailable("no engine");
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        provider.on_canceled(Arc::new(move |d| {
            *slot.lock().unwrap() = Some(d.clone());
        }));
        let err = provider.synthesize("<speak/>").unwrap_err();
        assert!(matches!(err, SpeechError::Canceled(_)));
        assert_eq!(seen.lock().unwrap().as_ref().unwrap().error_details, "no engine");
        assert_eq!(provider.requests(), vec!["<speak/>".to_string()]);
    }
}
