//! Tick events and their delivery channel.
//!
//! The scheduler only pushes into a [`TickSink`]. Listener code runs wherever
//! the caller drains the matching [`TickReceiver`] (`recv().await` on a
//! runtime, or `blocking_recv()` on a UI thread), never on the wakeup thread.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Beat position report: negative during pre-count, else `0..time_signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick: i32,
}

/// Receiving half of a tick channel.
pub type TickReceiver = mpsc::UnboundedReceiver<TickEvent>;

/// Sending half of a tick channel, registered with the engine.
#[derive(Debug, Clone)]
pub struct TickSink {
    tx: mpsc::UnboundedSender<TickEvent>,
}

impl TickSink {
    /// Queue a tick for delivery. Returns `false` once the receiver is gone.
    pub fn send(&self, tick: i32) -> bool {
        self.tx.send(TickEvent { tick }).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a connected sink/receiver pair.
pub fn tick_channel() -> (TickSink, TickReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TickSink { tx }, rx)
}
