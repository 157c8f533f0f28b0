//! Shared playback state.
//!
//! One mutex guards the stop flag, the busy flag and the status message. The
//! lock is only held for the duration of a single read or write, so the audio
//! thread never waits on work done by the interaction thread.
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Fields {
    stop_requested: bool,
    busy: bool,
    status_message: String,
    session: u64,
}

/// Point-in-time copy of the shared fields.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlaybackSnapshot {
    pub stop_requested: bool,
    pub busy: bool,
    pub status_message: String,
}

#[derive(Debug, Default)]
pub struct PlaybackState {
    fields: Mutex<Fields>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Fields> {
        // Every field is written whole, so a poisoned guard is still consistent.
        self.fields.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request_stop(&self) {
        self.lock().stop_requested = true;
    }

    /// Start a new playback session and drop any stop request left by the
    /// previous one. Returns the session id to pass to
    /// [`request_stop_for`](Self::request_stop_for).
    pub fn begin_session(&self) -> u64 {
        let mut fields = self.lock();
        fields.session = fields.session.wrapping_add(1);
        fields.stop_requested = false;
        fields.session
    }

    /// Raise the stop request only if `session` is still the current one.
    /// Returns whether the flag was set.
    pub fn request_stop_for(&self, session: u64) -> bool {
        let mut fields = self.lock();
        if fields.session != session {
            return false;
        }
        fields.stop_requested = true;
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Read and clear the stop flag in one step.
    pub fn take_stop_request(&self) -> bool {
        std::mem::take(&mut self.lock().stop_requested)
    }

    /// Set `busy` unless it is already set. Returns whether this call set it.
    pub fn try_begin(&self) -> bool {
        let mut fields = self.lock();
        if fields.busy {
            return false;
        }
        fields.busy = true;
        true
    }

    pub fn finish(&self) {
        self.lock().busy = false;
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(target = "speech", %message, "Status updated");
        self.lock().status_message = message;
    }

    pub fn status(&self) -> String {
        self.lock().status_message.clone()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let fields = self.lock();
        PlaybackSnapshot {
            stop_requested: fields.stop_requested,
            busy: fields.busy,
            status_message: fields.status_message.clone(),
        }
    }
}

/// Clears `busy` when dropped, on every exit path of a session.
#[must_use = "dropping the guard immediately clears the busy flag"]
pub struct BusyGuard<'a> {
    state: &'a PlaybackState,
}

impl<'a> BusyGuard<'a> {
    /// Claim the busy flag, or `None` if another session holds it.
    pub fn acquire(state: &'a PlaybackState) -> Option<Self> {
        state.try_begin().then(|| Self { state })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.finish();
    }
}
