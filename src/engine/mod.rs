//! Engine module housing the metronome runtime.
//!
//! `backend` renders looped bars, `scheduler` turns the renderer's sample
//! clock into tick events, and `metronome` is the public façade tying both to
//! the click assets and platform session notifications.

pub mod backend;
pub mod clock;
pub mod metronome;
pub mod scheduler;
pub mod session;
pub mod tick;

#[cfg(not(target_os = "android"))]
pub use backend::CpalPlaybackEngine;
pub use backend::{ManualPlaybackEngine, PlaybackEngine};
pub use clock::{ClockReference, PlaybackClock};
pub use metronome::{ClickBytes, MetronomeEngine};
pub use scheduler::{SchedulerState, SessionSnapshot, TickScheduler};
pub use session::{PlatformAudioSession, SessionEventListener};
pub use tick::{tick_channel, TickEvent, TickReceiver, TickSink};
