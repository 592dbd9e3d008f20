use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::BarBuffer;
use crate::error::MetronomeError;

use super::PlaybackEngine;

/// In-memory playback engine used for deterministic testing and dry runs.
///
/// Nothing is rendered. The sample clock only moves when
/// [`advance_frames`](Self::advance_frames) is called, and only while the
/// engine is running. Start failures can be injected.
#[derive(Default)]
pub struct ManualPlaybackEngine {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    running: bool,
    playing: bool,
    sample_time: u64,
    volume: f32,
    current: Option<Arc<BarBuffer>>,
    scheduled: Vec<Arc<BarBuffer>>,
    start_failure: Option<String>,
    start_count: usize,
    shutdown_count: usize,
}

impl ManualPlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose `start` always fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        let engine = Self::new();
        engine.set_start_failure(Some(reason));
        engine
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_start_failure(&self, reason: Option<&str>) {
        self.state().start_failure = reason.map(str::to_string);
    }

    /// Advance the sample clock by `frames` if the engine is running.
    pub fn advance_frames(&self, frames: u64) {
        let mut state = self.state();
        if state.running {
            state.sample_time += frames;
        }
    }

    /// Every buffer scheduled since creation, oldest first.
    pub fn scheduled_buffers(&self) -> Vec<Arc<BarBuffer>> {
        self.state().scheduled.clone()
    }

    /// The buffer currently looping, if any.
    pub fn current_buffer(&self) -> Option<Arc<BarBuffer>> {
        self.state().current.clone()
    }

    pub fn output_volume(&self) -> f32 {
        self.state().volume
    }

    /// Number of successful `start` calls that actually started the engine.
    pub fn start_count(&self) -> usize {
        self.state().start_count
    }

    pub fn shutdown_count(&self) -> usize {
        self.state().shutdown_count
    }
}

impl PlaybackEngine for ManualPlaybackEngine {
    fn start(&self) -> Result<(), MetronomeError> {
        let mut state = self.state();
        if let Some(reason) = &state.start_failure {
            return Err(MetronomeError::EngineStartFailure {
                reason: reason.clone(),
            });
        }
        if !state.running {
            state.running = true;
            state.start_count += 1;
        }
        Ok(())
    }

    fn schedule_looped(&self, buffer: Arc<BarBuffer>) -> Result<(), MetronomeError> {
        let mut state = self.state();
        if !state.running {
            return Err(MetronomeError::EngineStartFailure {
                reason: "engine not running".to_string(),
            });
        }
        state.scheduled.push(Arc::clone(&buffer));
        state.current = Some(buffer);
        Ok(())
    }

    fn play(&self) {
        let mut state = self.state();
        state.playing = state.running;
    }

    fn stop(&self) {
        let mut state = self.state();
        state.playing = false;
        state.current = None;
    }

    fn reset(&self) {
        self.state().current = None;
    }

    fn set_output_volume(&self, volume: f32) {
        self.state().volume = volume;
    }

    fn is_running(&self) -> bool {
        self.state().running
    }

    fn is_playing(&self) -> bool {
        self.state().playing
    }

    fn sample_time(&self) -> Option<u64> {
        let state = self.state();
        state.running.then_some(state.sample_time)
    }

    fn shutdown(&self) {
        let mut state = self.state();
        if state.running {
            state.shutdown_count += 1;
        }
        state.running = false;
        state.playing = false;
        state.current = None;
    }
}
