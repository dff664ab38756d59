//! Local 1 Hz progress clock.
//!
//! Each `arm()` starts a new epoch backed by its own interval task.  Ticks
//! carry their epoch so that anything still queued after a `disarm()` is
//! recognisably stale.  A tick is only sent once the previous one has been
//! accepted, so a slow consumer sees at most one pending tick, never a burst.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::core::EngineEvent;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

pub struct ProgressClock {
    period: Duration,
    tx: mpsc::Sender<EngineEvent>,
    epoch: u64,
    task: Option<AbortHandle>,
    /// Set by the interval task when it sends, cleared by `accept()`.
    pending: Arc<AtomicBool>,
}

impl ProgressClock {
    pub fn new(tx: mpsc::Sender<EngineEvent>, period: Duration) -> Self {
        Self {
            period,
            tx,
            epoch: 0,
            task: None,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start ticking.  The first tick fires one full period from now.
    pub fn arm(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.epoch += 1;
        self.pending = Arc::new(AtomicBool::new(false));

        let epoch = self.epoch;
        let period = self.period;
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if pending.swap(true, Ordering::AcqRel) {
                    // Previous tick not consumed yet; drop this one.
                    continue;
                }
                if tx.send(EngineEvent::Tick { epoch }).await.is_err() {
                    break;
                }
            }
        });
        self.task = Some(handle.abort_handle());
        debug!("clock: armed epoch={}", epoch);
    }

    /// Stop ticking.  Ticks already queued become stale.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("clock: disarmed epoch={}", self.epoch);
            self.epoch += 1;
        }
    }

    /// Called by the engine when a tick arrives.  True when the tick belongs
    /// to the live epoch and should be acted on.
    pub fn accept(&self, epoch: u64) -> bool {
        if self.task.is_none() || epoch != self.epoch {
            return false;
        }
        self.pending.store(false, Ordering::Release);
        true
    }
}

impl Drop for ProgressClock {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
