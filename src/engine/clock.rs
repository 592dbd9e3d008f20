//! Playback clock adapter
//!
//! Reads the playback engine's sample clock rather than the wall clock, so
//! the reported beat stays locked to what is actually audible no matter how
//! late the periodic wakeup fires.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::backend::PlaybackEngine;
use crate::error::MetronomeError;

/// Captured position of the playback engine's sample clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReference {
    sample_time: u64,
}

impl ClockReference {
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }
}

/// Query interface over a playback engine's hardware clock.
#[derive(Clone)]
pub struct PlaybackClock {
    engine: Arc<dyn PlaybackEngine>,
    sample_rate: u32,
}

impl PlaybackClock {
    /// `sample_rate` converts rendered frames into time.
    pub fn new(engine: Arc<dyn PlaybackEngine>, sample_rate: u32) -> Self {
        Self {
            engine,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Capture the current position of the engine clock.
    ///
    /// # Errors
    /// `ClockUnavailable` when the engine is not rendering.
    pub fn capture_reference(&self) -> Result<ClockReference, MetronomeError> {
        self.engine
            .sample_time()
            .map(|sample_time| ClockReference { sample_time })
            .ok_or(MetronomeError::ClockUnavailable)
    }

    /// Time rendered since `reference`, in the engine's own time base.
    ///
    /// When the engine reports that the loop scheduled at `reference` began
    /// rendering later (after the device picked it up), time is measured from
    /// that first audible frame instead.
    ///
    /// # Errors
    /// `ClockUnavailable` when the engine is not rendering.
    pub fn elapsed_since(&self, reference: ClockReference) -> Result<Duration, MetronomeError> {
        let now = self.capture_reference()?;
        let start = self
            .engine
            .loop_start_time()
            .filter(|&start| start >= reference.sample_time)
            .unwrap_or(reference.sample_time);
        let frames = now.sample_time.saturating_sub(start);
        Ok(frames_to_duration(frames, self.sample_rate))
    }
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    let sample_rate = sample_rate as u64;
    let secs = frames / sample_rate;
    let rem = frames % sample_rate;
    Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BarBuffer;
    use crate::engine::backend::ManualPlaybackEngine;

    #[test]
    fn test_capture_requires_rendering_engine() {
        let engine = Arc::new(ManualPlaybackEngine::new());
        let clock = PlaybackClock::new(engine.clone(), 44_100);
        assert_eq!(
            clock.capture_reference(),
            Err(MetronomeError::ClockUnavailable)
        );

        engine.start().unwrap();
        assert!(clock.capture_reference().is_ok());
    }

    #[test]
    fn test_elapsed_uses_sample_clock() {
        let engine = Arc::new(ManualPlaybackEngine::new());
        engine.start().unwrap();
        engine.advance_frames(1_000);

        let clock = PlaybackClock::new(engine.clone(), 44_100);
        let reference = clock.capture_reference().unwrap();
        assert_eq!(reference.sample_time(), 1_000);

        engine.advance_frames(66_150);
        assert_eq!(
            clock.elapsed_since(reference).unwrap(),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_elapsed_fails_after_shutdown() {
        let engine = Arc::new(ManualPlaybackEngine::new());
        engine.start().unwrap();
        let clock = PlaybackClock::new(engine.clone(), 48_000);
        let reference = clock.capture_reference().unwrap();

        engine.shutdown();
        assert_eq!(
            clock.elapsed_since(reference),
            Err(MetronomeError::ClockUnavailable)
        );
    }

    /// Renderer whose loop becomes audible some frames after scheduling.
    struct LateStartEngine {
        inner: ManualPlaybackEngine,
        loop_start: std::sync::Mutex<Option<u64>>,
    }

    impl PlaybackEngine for LateStartEngine {
        fn start(&self) -> Result<(), MetronomeError> {
            self.inner.start()
        }
        fn schedule_looped(&self, buffer: Arc<BarBuffer>) -> Result<(), MetronomeError> {
            self.inner.schedule_looped(buffer)
        }
        fn play(&self) {
            self.inner.play()
        }
        fn stop(&self) {
            self.inner.stop()
        }
        fn reset(&self) {
            self.inner.reset()
        }
        fn set_output_volume(&self, volume: f32) {
            self.inner.set_output_volume(volume)
        }
        fn is_running(&self) -> bool {
            self.inner.is_running()
        }
        fn is_playing(&self) -> bool {
            self.inner.is_playing()
        }
        fn sample_time(&self) -> Option<u64> {
            self.inner.sample_time()
        }
        fn loop_start_time(&self) -> Option<u64> {
            *self.loop_start.lock().unwrap()
        }
        fn shutdown(&self) {
            self.inner.shutdown()
        }
    }

    #[test]
    fn test_elapsed_measured_from_first_audible_frame() {
        let engine = Arc::new(LateStartEngine {
            inner: ManualPlaybackEngine::new(),
            loop_start: std::sync::Mutex::new(None),
        });
        engine.start().unwrap();
        let clock = PlaybackClock::new(engine.clone(), 1_000);
        let reference = clock.capture_reference().unwrap();

        // Device picks the loop up 256 frames after scheduling
        engine.inner.advance_frames(256);
        *engine.loop_start.lock().unwrap() = Some(256);
        engine.inner.advance_frames(1_000);
        assert_eq!(clock.elapsed_since(reference).unwrap(), Duration::from_secs(1));

        // A start recorded before this reference belongs to an older loop
        let later = clock.capture_reference().unwrap();
        engine.inner.advance_frames(500);
        assert_eq!(clock.elapsed_since(later).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_frames_to_duration_exact() {
        assert_eq!(frames_to_duration(48_000, 48_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(24_000, 48_000), Duration::from_millis(500));
        assert_eq!(frames_to_duration(0, 48_000), Duration::ZERO);
    }
}
