//! Encoded audio byte streams.
//!
//! A provider writes PCM bytes into a [`PcmPipe`] from its delivery thread while
//! the renderer pulls them from the audio thread. Reads never return 0 until the
//! writer has finished and the pipe is drained, so 0 always means exhausted.
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// Sequential, non-seekable cursor over encoded PCM bytes.
pub trait AudioByteStream: Send + Sync {
    /// Read up to `buf.len()` bytes into `buf` and return the count.
    /// `0` means the stream is exhausted.
    fn read(&self, buf: &mut [u8]) -> usize;
}

#[derive(Debug, Default)]
struct PipeInner {
    bytes: VecDeque<u8>,
    finished: bool,
    total_written: u64,
}

/// In-memory byte stream filled by a producer thread.
///
/// `read` waits for data only while the writer is still active, and never
/// longer than `stall_timeout`. A writer that stays silent past that timeout is
/// treated as finished.
#[derive(Debug)]
pub struct PcmPipe {
    inner: Mutex<PipeInner>,
    ready: Condvar,
    stall_timeout: Duration,
}

impl PcmPipe {
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PipeInner::default()),
            ready: Condvar::new(),
            stall_timeout,
        }
    }

    /// A pipe holding `bytes` with the writer already finished.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let pipe = Self::new(Duration::ZERO);
        pipe.write(&bytes.into());
        pipe.finish();
        pipe
    }

    /// Append bytes. Writes after `finish` are dropped.
    pub fn write(&self, bytes: &[u8]) {
        let mut inner = self.lock();
        if inner.finished {
            return;
        }
        inner.bytes.extend(bytes);
        inner.total_written += bytes.len() as u64;
        drop(inner);
        self.ready.notify_all();
    }

    /// Mark the end of the stream; readers drain what is left, then see 0.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.ready.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Whether at least one byte has been written.
    pub fn has_started(&self) -> bool {
        self.lock().total_written > 0
    }

    /// Block until the first byte arrives or the writer finishes, bounded by
    /// `timeout`. Returns whether data is available.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.total_written == 0 && !inner.finished {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = match self.ready.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        inner.total_written > 0
    }

    pub fn total_written(&self) -> u64 {
        self.lock().total_written
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipeInner> {
        // The pipe holds plain bytes; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioByteStream for PcmPipe {
    fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + self.stall_timeout;
        let mut inner = self.lock();
        while inner.bytes.is_empty() && !inner.finished {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    target = "speech",
                    timeout_ms = self.stall_timeout.as_millis() as u64,
                    "Byte stream stalled, treating as exhausted"
                );
                inner.finished = true;
                break;
            }
            inner = match self.ready.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        let n = buf.len().min(inner.bytes.len());
        for (dst, src) in buf[..n].iter_mut().zip(inner.bytes.drain(..n)) {
            *dst = src;
        }
        n
    }
}
