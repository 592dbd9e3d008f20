//! Backend abstractions for the playback engine that renders bar buffers.
//!
//! The scheduler never renders audio itself. It hands one synthesized bar to
//! a [`PlaybackEngine`] for looped playback and reads the engine's sample
//! clock to derive the beat position.

use std::sync::Arc;

use crate::audio::BarBuffer;
use crate::error::MetronomeError;

/// Trait implemented by renderers that loop bar buffers on their own
/// real-time thread.
///
/// `sample_time` is the hardware clock: frames rendered since the engine
/// started, or `None` while the engine is not rendering.
pub trait PlaybackEngine: Send + Sync {
    /// Start or resume the renderer. No-op when already running.
    fn start(&self) -> Result<(), MetronomeError>;
    /// Replace whatever is looping with `buffer`, starting at its first frame.
    fn schedule_looped(&self, buffer: Arc<BarBuffer>) -> Result<(), MetronomeError>;
    fn play(&self);
    fn stop(&self);
    /// Drop any scheduled buffer.
    fn reset(&self);
    fn set_output_volume(&self, volume: f32);
    fn is_running(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn sample_time(&self) -> Option<u64>;
    /// Sample time at which the most recently scheduled buffer began
    /// rendering, once it has. Renderers that start a buffer the moment it is
    /// scheduled can leave this as `None`.
    fn loop_start_time(&self) -> Option<u64> {
        None
    }
    /// Stop rendering and release device resources.
    fn shutdown(&self);
}

#[cfg(not(target_os = "android"))]
mod cpal;
#[cfg(not(target_os = "android"))]
pub use self::cpal::CpalPlaybackEngine;

mod manual;
pub use manual::ManualPlaybackEngine;
