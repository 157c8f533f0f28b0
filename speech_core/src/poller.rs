//! Deferred device stop.
//!
//! The renderer only raises `stop_requested`; stopping a device from inside its
//! own pull callback is not safe. The poller runs on a frame tick, takes the
//! request and performs the stop.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::sink::AudioSink;
use crate::state::PlaybackState;

pub struct StopPoller {
    state: Arc<PlaybackState>,
    sink: Arc<dyn AudioSink>,
}

impl StopPoller {
    pub fn new(state: Arc<PlaybackState>, sink: Arc<dyn AudioSink>) -> Self {
        Self { state, sink }
    }

    /// One frame: stop the sink if the renderer asked for it. Returns whether a
    /// stop was performed.
    pub fn poll(&self) -> bool {
        if !self.state.take_stop_request() {
            return false;
        }
        debug!(target = "speech", "Stop requested, stopping sink");
        self.sink.stop();
        true
    }

    /// Poll every `period` until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(target = "speech", period_ms = period.as_millis() as u64, "Stop poller running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(target = "speech", "Stop poller stopped");
    }
}
