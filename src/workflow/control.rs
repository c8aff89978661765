//! Cooperative run control: pause, resume and cancel at node boundaries.
//!
//! A [`RunControl`] is a cloneable handle over a `tokio::sync::watch`
//! channel. The engine consults it before every node; a node that has already
//! started always runs to completion or failure first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Outcome of a boundary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    /// Continue; `paused_for` is how long the run sat paused at this boundary.
    Proceed { paused_for: Duration },
    Cancelled,
}

/// Shared handle for steering one or more runs.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<ControlSignal>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlSignal::Run);
        Self { tx: Arc::new(tx) }
    }

    /// Request a pause at the next node boundary. No effect once cancelled.
    pub fn pause(&self) -> bool {
        self.transition(ControlSignal::Pause)
    }

    /// Resume a paused run. No effect once cancelled.
    pub fn resume(&self) -> bool {
        self.transition(ControlSignal::Run)
    }

    /// Cancel at the next node boundary. Sticky.
    pub fn cancel(&self) -> bool {
        self.transition(ControlSignal::Cancel)
    }

    pub fn signal(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.signal() == ControlSignal::Pause
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal() == ControlSignal::Cancel
    }

    /// Returns whether the signal actually changed.
    fn transition(&self, next: ControlSignal) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == ControlSignal::Cancel || *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Block while paused; report cancellation.
    pub(crate) async fn checkpoint(&self) -> Checkpoint {
        let mut rx = self.tx.subscribe();
        let mut paused_since: Option<tokio::time::Instant> = None;

        loop {
            let signal = *rx.borrow_and_update();
            match signal {
                ControlSignal::Run => {
                    let paused_for = paused_since.map(|t| t.elapsed()).unwrap_or_default();
                    return Checkpoint::Proceed { paused_for };
                }
                ControlSignal::Cancel => return Checkpoint::Cancelled,
                ControlSignal::Pause => {
                    paused_since.get_or_insert_with(tokio::time::Instant::now);
                    // The sender lives in `self`, so this only errors if it is dropped.
                    if rx.changed().await.is_err() {
                        return Checkpoint::Cancelled;
                    }
                }
            }
        }
    }
}
