//! TickScheduler - pre-count / steady-state tick emission
//!
//! All mutable playback state lives in one [`PlaybackSession`] behind a single
//! mutex, shared by the public API and the periodic wakeup. Ticks are emitted
//! while that lock is held, and `stop()` bumps the session epoch under the
//! same lock, so no tick can be emitted once `stop()` has returned.
//!
//! During pre-count the tick simply counts up towards 0. In steady state it is
//! recomputed on every wakeup from the playback engine's sample clock, so
//! wakeup jitter never accumulates into the reported beat.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::{synthesize, BarBuffer, ClickAssetSet};
use crate::config::{MetronomeConfig, WakeupMode};
use crate::engine::backend::PlaybackEngine;
use crate::engine::clock::{ClockReference, PlaybackClock};
use crate::engine::tick::TickSink;
use crate::error::{log_metronome_error, MetronomeError};

/// Guards `floor()` against float error when elapsed time lands on a beat.
const BEAT_EPSILON: f64 = 1e-6;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    PreCount,
    Playing,
}

/// Point-in-time copy of the session for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SchedulerState,
    pub bpm: u32,
    pub time_signature: u32,
    pub volume: f32,
    pub sample_rate: u32,
    pub pre_count_bars: u32,
    pub current_tick: i32,
    pub is_in_pre_count: bool,
    pub remaining_pre_count_bars: u32,
    pub is_first_tick: bool,
}

struct WakeupHandle {
    cancel_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Mutable scheduler state, guarded by the scheduler's single lock.
pub(crate) struct PlaybackSession {
    bpm: u32,
    time_signature: u32,
    volume: f32,
    sample_rate: u32,
    pre_count_bars: u32,
    start_reference: Option<ClockReference>,
    current_tick: i32,
    is_in_pre_count: bool,
    remaining_pre_count_bars: u32,
    is_first_tick: bool,
    state: SchedulerState,
    /// Bumped on every play/stop; a wakeup from an older epoch is stale.
    epoch: u64,
    in_flight: Option<Arc<BarBuffer>>,
    tick_sink: Option<TickSink>,
    wakeup: Option<WakeupHandle>,
}

impl PlaybackSession {
    pub(crate) fn new(config: &MetronomeConfig) -> Self {
        Self {
            bpm: config.bpm,
            time_signature: config.time_signature,
            volume: config.volume.clamp(0.0, 1.0),
            sample_rate: config.sample_rate,
            pre_count_bars: config.pre_count_bars,
            start_reference: None,
            current_tick: 0,
            is_in_pre_count: false,
            remaining_pre_count_bars: 0,
            is_first_tick: false,
            state: SchedulerState::Stopped,
            epoch: 0,
            in_flight: None,
            tick_sink: None,
            wakeup: None,
        }
    }

    /// Enter pre-count or steady playback with a freshly scheduled bar.
    ///
    /// Returns the initial tick to report.
    fn begin(
        &mut self,
        bars: u32,
        used_pre_count: bool,
        reference: ClockReference,
        bar: Arc<BarBuffer>,
    ) -> i32 {
        let beats_per_bar = self.time_signature.max(1);
        let pre_count_beats = bars.saturating_mul(beats_per_bar).min(i32::MAX as u32) as i32;

        self.is_in_pre_count = bars > 0;
        self.current_tick = -pre_count_beats;
        self.remaining_pre_count_bars = bars;
        if used_pre_count {
            self.remaining_pre_count_bars -= 1;
        }
        self.is_first_tick = true;
        self.start_reference = Some(reference);
        self.in_flight = Some(bar);
        self.state = if bars > 0 {
            SchedulerState::PreCount
        } else {
            SchedulerState::Playing
        };
        self.epoch += 1;
        self.current_tick
    }

    fn halt(&mut self) -> Option<WakeupHandle> {
        self.state = SchedulerState::Stopped;
        self.epoch += 1;
        self.start_reference = None;
        self.is_in_pre_count = false;
        self.is_first_tick = false;
        self.remaining_pre_count_bars = 0;
        self.in_flight = None;
        self.wakeup.take()
    }

    /// One periodic wakeup. Returns the tick to emit, if any.
    ///
    /// `elapsed` reports playback time since the start reference.
    pub(crate) fn on_wakeup<F>(&mut self, elapsed: F) -> Option<i32>
    where
        F: FnOnce(ClockReference) -> Result<Duration, MetronomeError>,
    {
        if self.state == SchedulerState::Stopped {
            return None;
        }

        // play() already reported the initial tick.
        if self.is_first_tick {
            self.is_first_tick = false;
            return None;
        }

        if self.is_in_pre_count {
            self.current_tick += 1;
            if self.current_tick == 0 {
                self.is_in_pre_count = false;
                self.state = SchedulerState::Playing;
            }
            return Some(self.current_tick);
        }

        let reference = self.start_reference?;
        let elapsed = match elapsed(reference) {
            Ok(elapsed) => elapsed,
            Err(err) => {
                tracing::debug!("[TickScheduler] Skipping wakeup: {}", err);
                return None;
            }
        };

        let beats = elapsed.as_secs_f64() * self.bpm as f64 / 60.0;
        let current_beat = (beats + BEAT_EPSILON).floor() as u64;
        let tick = if self.time_signature > 1 {
            (current_beat % self.time_signature as u64) as i32
        } else {
            0
        };
        Some(tick)
    }

    fn emit(&mut self, tick: i32) {
        if let Some(sink) = &self.tick_sink {
            if !sink.send(tick) {
                tracing::debug!("[TickScheduler] Tick receiver dropped; clearing sink");
                self.tick_sink = None;
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            bpm: self.bpm,
            time_signature: self.time_signature,
            volume: self.volume,
            sample_rate: self.sample_rate,
            pre_count_bars: self.pre_count_bars,
            current_tick: self.current_tick,
            is_in_pre_count: self.is_in_pre_count,
            remaining_pre_count_bars: self.remaining_pre_count_bars,
            is_first_tick: self.is_first_tick,
        }
    }
}

/// Drives bar scheduling and tick emission against a playback engine.
pub struct TickScheduler {
    session: Arc<Mutex<PlaybackSession>>,
    engine: Arc<dyn PlaybackEngine>,
    clock: PlaybackClock,
    wakeup_mode: WakeupMode,
}

impl TickScheduler {
    pub fn new(
        config: &MetronomeConfig,
        engine: Arc<dyn PlaybackEngine>,
        wakeup_mode: WakeupMode,
    ) -> Self {
        let clock = PlaybackClock::new(Arc::clone(&engine), config.sample_rate);
        Self {
            session: Arc::new(Mutex::new(PlaybackSession::new(config))),
            engine,
            clock,
            wakeup_mode,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlaybackSession>, MetronomeError> {
        Ok(self.session.lock()?)
    }

    /// Start playback from the top of the bar.
    ///
    /// `pre_count_bars_override` replaces the configured pre-count when set.
    /// Any failure leaves the scheduler stopped without emitting a tick.
    pub fn play(
        &self,
        assets: &ClickAssetSet,
        pre_count_bars_override: Option<u32>,
    ) -> Result<(), MetronomeError> {
        let (stale, result) = {
            let mut session = self.lock()?;
            if session.state != SchedulerState::Stopped {
                self.engine.stop();
            }
            let stale = session.halt();
            let result = self.start_locked(&mut session, assets, pre_count_bars_override);
            (stale, result)
        };
        Self::join_wakeup(stale);
        result
    }

    fn start_locked(
        &self,
        session: &mut PlaybackSession,
        assets: &ClickAssetSet,
        pre_count_bars_override: Option<u32>,
    ) -> Result<(), MetronomeError> {
        self.engine.start().map_err(|err| {
            log_metronome_error(&err, "play");
            err
        })?;

        let bars = pre_count_bars_override.unwrap_or(session.pre_count_bars);
        let use_pre_count = bars > 0;

        let scheduled = synthesize(
            assets,
            session.bpm,
            session.time_signature,
            session.sample_rate,
            use_pre_count,
        )
        .map(Arc::new)
        .and_then(|bar| {
            self.engine.schedule_looped(Arc::clone(&bar))?;
            let reference = self.clock.capture_reference()?;
            Ok((bar, reference))
        });

        let (bar, reference) = match scheduled {
            Ok(scheduled) => scheduled,
            Err(err) => {
                self.engine.stop();
                log_metronome_error(&err, "play");
                return Err(err);
            }
        };

        let frames = bar.frames();
        let initial_tick = session.begin(bars, use_pre_count, reference, bar);
        session.emit(initial_tick);
        self.engine.play();

        if self.wakeup_mode == WakeupMode::Thread {
            session.wakeup = self.spawn_wakeup(session.epoch, session.bpm);
        }

        tracing::info!(
            "[TickScheduler] Playing at {} BPM, {} beats/bar, {} pre-count bar(s), bar={} frames",
            session.bpm,
            session.time_signature,
            bars,
            frames
        );
        Ok(())
    }

    fn spawn_wakeup(&self, epoch: u64, bpm: u32) -> Option<WakeupHandle> {
        let interval = Duration::from_secs_f64(60.0 / bpm as f64);
        let session = Arc::clone(&self.session);
        let clock = self.clock.clone();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("metronome-wakeup".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                loop {
                    {
                        let Ok(mut session) = session.lock() else {
                            break;
                        };
                        if session.epoch != epoch {
                            break;
                        }
                        if let Some(tick) = session.on_wakeup(|r| clock.elapsed_since(r)) {
                            session.emit(tick);
                        }
                    }

                    deadline += interval;
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match cancel_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(WakeupHandle { cancel_tx, handle }),
            Err(err) => {
                tracing::warn!("[TickScheduler] Failed to spawn wakeup thread: {}", err);
                None
            }
        }
    }

    fn join_wakeup(wakeup: Option<WakeupHandle>) {
        if let Some(wakeup) = wakeup {
            let _ = wakeup.cancel_tx.send(());
            if wakeup.handle.thread().id() != std::thread::current().id() {
                let _ = wakeup.handle.join();
            }
        }
    }

    /// Run one wakeup step now. Used with [`WakeupMode::External`].
    ///
    /// Returns the tick that was emitted, if any.
    pub fn poll(&self) -> Result<Option<i32>, MetronomeError> {
        let mut session = self.lock()?;
        let tick = session.on_wakeup(|r| self.clock.elapsed_since(r));
        if let Some(tick) = tick {
            session.emit(tick);
        }
        Ok(tick)
    }

    /// Stop playback. Idempotent.
    ///
    /// The periodic wakeup is cancelled before this returns.
    pub fn stop(&self) -> Result<(), MetronomeError> {
        let wakeup = {
            let mut session = self.lock()?;
            if session.state == SchedulerState::Stopped && session.wakeup.is_none() {
                return Ok(());
            }
            let wakeup = session.halt();
            self.engine.stop();
            wakeup
        };
        Self::join_wakeup(wakeup);
        tracing::info!("[TickScheduler] Stopped");
        Ok(())
    }

    /// Restart from tick 0 without pre-count if currently active.
    pub fn restart_if_active(&self, assets: &ClickAssetSet) -> Result<(), MetronomeError> {
        self.update_and_restart(assets, |_| true)
    }

    /// Apply `update` and, if it reports a change while active, restart at
    /// tick 0 without pre-count.
    ///
    /// The update, the halt of the old session and the restart share one
    /// critical section, so a concurrent `stop()` or wakeup sees either the
    /// old session or the restarted one.
    fn update_and_restart<F>(
        &self,
        assets: &ClickAssetSet,
        update: F,
    ) -> Result<(), MetronomeError>
    where
        F: FnOnce(&mut PlaybackSession) -> bool,
    {
        let (stale, result) = {
            let mut session = self.lock()?;
            if !update(&mut session) || session.state == SchedulerState::Stopped {
                return Ok(());
            }
            self.engine.stop();
            let stale = session.halt();
            let result = self.start_locked(&mut session, assets, Some(0));
            (stale, result)
        };
        Self::join_wakeup(stale);
        result
    }

    pub fn set_bpm(&self, bpm: u32, assets: &ClickAssetSet) -> Result<(), MetronomeError> {
        if bpm == 0 {
            return Err(MetronomeError::InvalidParameter {
                name: "bpm",
                value: bpm as i64,
            });
        }
        self.update_and_restart(assets, |session| {
            if session.bpm == bpm {
                return false;
            }
            session.bpm = bpm;
            tracing::debug!("[TickScheduler] BPM set to {}", bpm);
            true
        })
    }

    pub fn set_time_signature(
        &self,
        time_signature: u32,
        assets: &ClickAssetSet,
    ) -> Result<(), MetronomeError> {
        self.update_and_restart(assets, |session| {
            if session.time_signature == time_signature {
                return false;
            }
            session.time_signature = time_signature;
            tracing::debug!("[TickScheduler] Time signature set to {}", time_signature);
            true
        })
    }

    /// Set output volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, volume: f32) -> Result<(), MetronomeError> {
        let volume = volume.clamp(0.0, 1.0);
        self.lock()?.volume = volume;
        self.engine.set_output_volume(volume);
        Ok(())
    }

    /// Configured pre-count used by `play(None)`.
    pub fn set_pre_count_bars(&self, bars: u32) -> Result<(), MetronomeError> {
        self.lock()?.pre_count_bars = bars;
        Ok(())
    }

    /// Register (or clear) the tick sink. Replaces any previous sink.
    pub fn set_tick_sink(&self, sink: Option<TickSink>) -> Result<(), MetronomeError> {
        self.lock()?.tick_sink = sink;
        Ok(())
    }

    /// True in pre-count or steady playback.
    pub fn is_active(&self) -> bool {
        self.snapshot().state != SchedulerState::Stopped
    }

    /// Read-only view; a poisoned lock still yields the last written state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// The bar buffer currently handed to the renderer.
    pub fn in_flight_bar(&self) -> Result<Option<Arc<BarBuffer>>, MetronomeError> {
        Ok(self.lock()?.in_flight.clone())
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        let wakeup = match self.session.lock() {
            Ok(mut session) => session.halt(),
            Err(_) => None,
        };
        Self::join_wakeup(wakeup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ClickSound;

    fn config(bpm: u32, time_signature: u32) -> MetronomeConfig {
        MetronomeConfig {
            bpm,
            time_signature,
            sample_rate: 1_000,
            ..MetronomeConfig::default()
        }
    }

    fn bar() -> Arc<BarBuffer> {
        let assets = ClickAssetSet::from_main(ClickSound::mono(1_000, vec![1.0; 10]));
        Arc::new(synthesize(&assets, 120, 1, 1_000, false).unwrap())
    }

    fn reference() -> ClockReference {
        let engine = crate::engine::backend::ManualPlaybackEngine::new();
        engine.start().unwrap();
        PlaybackClock::new(Arc::new(engine), 1_000)
            .capture_reference()
            .unwrap()
    }

    /// Run wakeups where the n-th wakeup (first = 0) sees `n` beats elapsed.
    fn run_wakeups(session: &mut PlaybackSession, count: usize) -> Vec<i32> {
        let beat = Duration::from_secs_f64(60.0 / session.bpm as f64);
        (0..count)
            .filter_map(|n| session.on_wakeup(|_| Ok(beat * n as u32)))
            .collect()
    }

    #[test]
    fn test_pre_count_then_steady_sequence() {
        let mut session = PlaybackSession::new(&config(120, 4));
        let initial = session.begin(2, true, reference(), bar());
        assert_eq!(initial, -8);
        assert_eq!(session.state, SchedulerState::PreCount);
        assert_eq!(session.remaining_pre_count_bars, 1);

        let ticks = run_wakeups(&mut session, 17);
        assert_eq!(
            ticks,
            vec![-7, -6, -5, -4, -3, -2, -1, 0, 1, 2, 3, 0, 1, 2, 3, 0]
        );
        assert_eq!(session.state, SchedulerState::Playing);
        assert!(!session.is_in_pre_count);
    }

    #[test]
    fn test_first_wakeup_is_consumed_without_pre_count() {
        let mut session = PlaybackSession::new(&config(120, 3));
        assert_eq!(session.begin(0, false, reference(), bar()), 0);
        assert_eq!(session.state, SchedulerState::Playing);

        let ticks = run_wakeups(&mut session, 7);
        assert_eq!(ticks, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_single_beat_meter_always_reports_zero() {
        for ts in [0, 1] {
            let mut session = PlaybackSession::new(&config(100, ts));
            session.begin(0, false, reference(), bar());
            assert!(run_wakeups(&mut session, 6).iter().all(|&t| t == 0));
        }
    }

    #[test]
    fn test_pre_count_with_zero_time_signature_counts_one_beat_per_bar() {
        let mut session = PlaybackSession::new(&config(120, 0));
        assert_eq!(session.begin(3, true, reference(), bar()), -3);

        let ticks = run_wakeups(&mut session, 6);
        assert_eq!(ticks, vec![-2, -1, 0, 0, 0]);
        assert_eq!(session.state, SchedulerState::Playing);
    }

    #[test]
    fn test_steady_tick_follows_clock_not_wakeup_count() {
        let mut session = PlaybackSession::new(&config(60, 4));
        session.begin(0, false, reference(), bar());
        assert_eq!(session.on_wakeup(|_| Ok(Duration::ZERO)), None);

        // Late wakeup: 2.9 beats elapsed still reports beat 2
        assert_eq!(
            session.on_wakeup(|_| Ok(Duration::from_millis(2_900))),
            Some(2)
        );
        // Two wakeups landing in the same beat report the same tick
        assert_eq!(
            session.on_wakeup(|_| Ok(Duration::from_millis(5_100))),
            Some(1)
        );
        assert_eq!(
            session.on_wakeup(|_| Ok(Duration::from_millis(5_900))),
            Some(1)
        );
    }

    #[test]
    fn test_clock_failure_skips_emission() {
        let mut session = PlaybackSession::new(&config(120, 4));
        session.begin(0, false, reference(), bar());
        session.on_wakeup(|_| Ok(Duration::ZERO));
        assert_eq!(
            session.on_wakeup(|_| Err(MetronomeError::ClockUnavailable)),
            None
        );
    }

    #[test]
    fn test_stopped_session_never_ticks() {
        let mut session = PlaybackSession::new(&config(120, 4));
        session.begin(1, true, reference(), bar());
        session.halt();
        assert_eq!(session.on_wakeup(|_| Ok(Duration::from_secs(10))), None);
        assert!(session.in_flight.is_none());
    }

    #[test]
    fn test_epoch_changes_on_begin_and_halt() {
        let mut session = PlaybackSession::new(&config(120, 4));
        let start = session.epoch;
        session.begin(0, false, reference(), bar());
        let playing = session.epoch;
        session.halt();
        assert!(playing > start);
        assert!(session.epoch > playing);
    }
}
