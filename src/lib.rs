// Metronome Engine - sample-accurate click scheduling
// Bar synthesis, looped playback and pre-count aware tick reporting

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;

pub use audio::{ClickAssetSet, ClickSound};
pub use config::{AppConfig, MetronomeConfig, SchedulerConfig, WakeupMode};
pub use engine::{tick_channel, ClickBytes, MetronomeEngine, TickEvent, TickReceiver, TickSink};
pub use error::MetronomeError;
