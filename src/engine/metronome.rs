//! MetronomeEngine - public façade over the scheduler and playback engine
//!
//! Holds the click asset set and routes every public operation to the
//! [`TickScheduler`]. Lock order is always assets first, then the scheduler's
//! session lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::{AudioDecoder, ClickAssetSet, ClickSound};
use crate::config::{AppConfig, SchedulerConfig};
use crate::engine::backend::PlaybackEngine;
use crate::engine::scheduler::{SessionSnapshot, TickScheduler};
use crate::engine::session::{PlatformAudioSession, SessionEventListener};
use crate::engine::tick::TickSink;
use crate::error::{log_metronome_error, MetronomeError};

/// Raw click file bytes for [`MetronomeEngine::from_bytes`].
///
/// Empty optional slots are treated as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickBytes<'a> {
    pub main: &'a [u8],
    pub accented: Option<&'a [u8]>,
    pub pre_count_main: Option<&'a [u8]>,
    pub pre_count_accented: Option<&'a [u8]>,
}

impl<'a> ClickBytes<'a> {
    pub fn main(main: &'a [u8]) -> Self {
        Self {
            main,
            ..Self::default()
        }
    }
}

fn decode_slot(
    bytes: Option<&[u8]>,
    decoder: &dyn AudioDecoder,
) -> Result<Option<ClickSound>, MetronomeError> {
    match bytes {
        Some(bytes) if !bytes.is_empty() => decoder.decode(bytes).map(Some),
        _ => Ok(None),
    }
}

pub struct MetronomeEngine {
    assets: Mutex<ClickAssetSet>,
    scheduler: TickScheduler,
    engine: Arc<dyn PlaybackEngine>,
    scheduler_config: SchedulerConfig,
    destroyed: AtomicBool,
}

impl MetronomeEngine {
    /// Build an engine from already-decoded click sounds.
    ///
    /// # Errors
    /// `InvalidParameter` when the configured bpm or sample rate is 0.
    pub fn new(
        config: &AppConfig,
        assets: ClickAssetSet,
        engine: Arc<dyn PlaybackEngine>,
    ) -> Result<Self, MetronomeError> {
        config.metronome.validate()?;

        let scheduler = TickScheduler::new(
            &config.metronome,
            Arc::clone(&engine),
            config.scheduler.wakeup,
        );
        engine.set_output_volume(config.metronome.volume.clamp(0.0, 1.0));

        tracing::info!(
            "[MetronomeEngine] Created: bpm={} time_signature={} sample_rate={} pre_count_bars={}",
            config.metronome.bpm,
            config.metronome.time_signature,
            config.metronome.sample_rate,
            config.metronome.pre_count_bars
        );

        Ok(Self {
            assets: Mutex::new(assets),
            scheduler,
            engine,
            scheduler_config: config.scheduler.clone(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Build an engine from encoded click files.
    ///
    /// # Errors
    /// `DecodeError` when any supplied slot fails to decode (including an
    /// empty main click), `InvalidParameter` for bad configuration.
    pub fn from_bytes(
        config: &AppConfig,
        bytes: ClickBytes<'_>,
        decoder: &dyn AudioDecoder,
        engine: Arc<dyn PlaybackEngine>,
    ) -> Result<Self, MetronomeError> {
        let main = decoder.decode(bytes.main)?;
        let accented = decode_slot(bytes.accented, decoder)?;
        let pre_count_main = decode_slot(bytes.pre_count_main, decoder)?;
        let pre_count_accented = decode_slot(bytes.pre_count_accented, decoder)?;

        let assets = ClickAssetSet::new(main, accented, pre_count_main, pre_count_accented);
        Self::new(config, assets, engine)
    }

    fn assets(&self) -> Result<MutexGuard<'_, ClickAssetSet>, MetronomeError> {
        Ok(self.assets.lock()?)
    }

    /// Start from the top of the bar.
    ///
    /// `pre_count_bars` overrides the configured pre-count when set.
    pub fn play(&self, pre_count_bars: Option<u32>) -> Result<(), MetronomeError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(MetronomeError::EngineStartFailure {
                reason: "metronome has been destroyed".to_string(),
            });
        }
        let assets = self.assets()?;
        self.scheduler.play(&assets, pre_count_bars)
    }

    /// Alias for [`stop`](Self::stop).
    pub fn pause(&self) -> Result<(), MetronomeError> {
        self.stop()
    }

    pub fn stop(&self) -> Result<(), MetronomeError> {
        self.scheduler.stop()
    }

    /// Change tempo; restarts from tick 0 when playing.
    pub fn set_bpm(&self, bpm: u32) -> Result<(), MetronomeError> {
        let assets = self.assets()?;
        self.scheduler.set_bpm(bpm, &assets)
    }

    /// Change beats per bar; restarts from tick 0 when playing.
    pub fn set_time_signature(&self, time_signature: u32) -> Result<(), MetronomeError> {
        let assets = self.assets()?;
        self.scheduler.set_time_signature(time_signature, &assets)
    }

    /// Replace the main and/or accented click.
    ///
    /// Missing or empty slots keep their current sound. Every supplied slot
    /// is decoded before anything changes, so a decode failure leaves the
    /// asset set untouched. Restarts from tick 0 when playing.
    pub fn set_audio_file(
        &self,
        main: Option<&[u8]>,
        accented: Option<&[u8]>,
        decoder: &dyn AudioDecoder,
    ) -> Result<(), MetronomeError> {
        let main = decode_slot(main, decoder)?;
        let accented = decode_slot(accented, decoder)?;

        let mut assets = self.assets()?;
        if !assets.update(main, accented) {
            return Ok(());
        }
        tracing::debug!("[MetronomeEngine] Click sounds replaced");
        self.scheduler.restart_if_active(&assets)
    }

    /// Set volume, clamped to [0.0, 1.0]. Does not restart playback.
    pub fn set_volume(&self, volume: f32) -> Result<(), MetronomeError> {
        self.scheduler.set_volume(volume)
    }

    /// Pre-count used by `play(None)`.
    pub fn set_pre_count_bars(&self, bars: u32) -> Result<(), MetronomeError> {
        self.scheduler.set_pre_count_bars(bars)
    }

    pub fn time_signature(&self) -> u32 {
        self.scheduler.snapshot().time_signature
    }

    pub fn bpm(&self) -> u32 {
        self.scheduler.snapshot().bpm
    }

    pub fn volume(&self) -> f32 {
        self.scheduler.snapshot().volume
    }

    /// Volume as a whole percentage, truncated.
    pub fn volume_percent(&self) -> u32 {
        (self.volume() * 100.0) as u32
    }

    /// Whether the renderer is producing audio.
    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.scheduler.snapshot()
    }

    /// Deliver ticks to `sink`, replacing any previous one.
    pub fn enable_tick_callback(&self, sink: TickSink) -> Result<(), MetronomeError> {
        self.scheduler.set_tick_sink(Some(sink))
    }

    /// Run one scheduler wakeup. Only needed with `WakeupMode::External`.
    pub fn poll(&self) -> Result<Option<i32>, MetronomeError> {
        self.scheduler.poll()
    }

    /// Stop playback and release the renderer. Safe to call repeatedly.
    pub fn destroy(&self) -> Result<(), MetronomeError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.stop()?;
        self.scheduler.set_tick_sink(None)?;
        self.engine.shutdown();
        tracing::info!("[MetronomeEngine] Destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Subscribe to interruption and route-change notifications.
    pub fn attach_session(self: &Arc<Self>, session: &dyn PlatformAudioSession) {
        let listener: Arc<dyn SessionEventListener> = self.clone();
        session.register(Arc::downgrade(&listener));
    }

    fn restart_renderer(&self) {
        self.engine.stop();
        self.engine.reset();
        self.engine.shutdown();
        if let Err(err) = self.engine.start() {
            log_metronome_error(&err, "route change restart");
        }
    }
}

impl SessionEventListener for MetronomeEngine {
    fn on_interruption(&self) {
        if !self.scheduler.is_active() {
            return;
        }
        tracing::info!("[MetronomeEngine] Audio session interrupted; pausing");
        if let Err(err) = self.pause() {
            log_metronome_error(&err, "interruption");
        }
    }

    /// Blocks the notifying thread for the configured settle time.
    fn on_route_change(&self) {
        if self.is_destroyed() {
            return;
        }
        let was_playing = self.scheduler.is_active();
        tracing::info!(
            "[MetronomeEngine] Audio route changed (was_playing={})",
            was_playing
        );

        if was_playing {
            if let Err(err) = self.pause() {
                log_metronome_error(&err, "route change pause");
            }
        }

        std::thread::sleep(self.scheduler_config.route_change_settle());
        self.restart_renderer();

        if was_playing && !self.is_destroyed() {
            if let Err(err) = self.play(None) {
                log_metronome_error(&err, "route change resume");
            }
        }
    }
}

impl Drop for MetronomeEngine {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log_metronome_error(&err, "drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Pcm16Decoder, WavDecoder};
    use crate::config::WakeupMode;
    use crate::engine::backend::ManualPlaybackEngine;
    use crate::engine::scheduler::SchedulerState;
    use crate::engine::session::testing::RecordingSession;
    use crate::engine::tick::tick_channel;

    fn app_config(bpm: u32, time_signature: u32, pre_count_bars: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.metronome.bpm = bpm;
        config.metronome.time_signature = time_signature;
        config.metronome.sample_rate = 1_000;
        config.metronome.pre_count_bars = pre_count_bars;
        config.scheduler.wakeup = WakeupMode::External;
        config.scheduler.route_change_settle_ms = 0;
        config
    }

    fn engine_with(config: &AppConfig) -> (MetronomeEngine, Arc<ManualPlaybackEngine>) {
        let backend = Arc::new(ManualPlaybackEngine::new());
        let assets = ClickAssetSet::from_main(ClickSound::mono(1_000, vec![0.5; 20]));
        let metronome = MetronomeEngine::new(config, assets, backend.clone()).unwrap();
        (metronome, backend)
    }

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_new_rejects_zero_bpm() {
        let backend = Arc::new(ManualPlaybackEngine::new());
        let assets = ClickAssetSet::from_main(ClickSound::mono(1_000, vec![0.5; 4]));
        let result = MetronomeEngine::new(&app_config(0, 4, 0), assets, backend);
        assert!(matches!(
            result,
            Err(MetronomeError::InvalidParameter { name: "bpm", .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_empty_main() {
        let backend = Arc::new(ManualPlaybackEngine::new());
        let result = MetronomeEngine::from_bytes(
            &app_config(120, 4, 0),
            ClickBytes::main(&[]),
            &WavDecoder,
            backend,
        );
        assert!(matches!(result, Err(MetronomeError::DecodeError { .. })));
    }

    #[test]
    fn test_from_bytes_treats_empty_slots_as_absent() {
        let backend = Arc::new(ManualPlaybackEngine::new());
        let main = pcm16(&[i16::MAX; 8]);
        let bytes = ClickBytes {
            main: &main,
            accented: Some(&[][..]),
            ..ClickBytes::default()
        };
        let metronome = MetronomeEngine::from_bytes(
            &app_config(120, 2, 0),
            bytes,
            &Pcm16Decoder::mono(1_000),
            backend.clone(),
        )
        .unwrap();

        metronome.play(None).unwrap();
        let bar = backend.current_buffer().unwrap();
        assert_eq!(bar.beat(0), bar.beat(1));
    }

    #[test]
    fn test_play_reports_initial_tick_and_starts_renderer() {
        let (metronome, backend) = engine_with(&app_config(120, 4, 0));
        let (sink, mut rx) = tick_channel();
        metronome.enable_tick_callback(sink).unwrap();

        metronome.play(None).unwrap();
        assert!(metronome.is_playing());
        assert_eq!(backend.scheduled_buffers().len(), 1);
        assert_eq!(rx.try_recv().unwrap().tick, 0);
    }

    #[test]
    fn test_set_bpm_restarts_without_pre_count() {
        let (metronome, backend) = engine_with(&app_config(120, 4, 2));
        let (sink, mut rx) = tick_channel();
        metronome.enable_tick_callback(sink).unwrap();

        metronome.play(None).unwrap();
        assert_eq!(rx.try_recv().unwrap().tick, -8);

        metronome.set_bpm(90).unwrap();
        assert_eq!(rx.try_recv().unwrap().tick, 0);
        assert_eq!(backend.scheduled_buffers().len(), 2);
        assert_eq!(backend.current_buffer().unwrap().beat_length(), 667);

        // Same value: nothing rescheduled
        metronome.set_bpm(90).unwrap();
        assert_eq!(backend.scheduled_buffers().len(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_bpm_while_stopped_only_updates() {
        let (metronome, backend) = engine_with(&app_config(120, 4, 0));
        metronome.set_bpm(60).unwrap();
        assert_eq!(metronome.bpm(), 60);
        assert!(backend.scheduled_buffers().is_empty());
        assert!(!metronome.is_playing());
    }

    #[test]
    fn test_set_audio_file_keeps_assets_on_decode_failure() {
        let (metronome, backend) = engine_with(&app_config(120, 2, 0));
        metronome.play(None).unwrap();
        let before = backend.current_buffer().unwrap();

        let main = pcm16(&[1_000; 4]);
        let result = metronome.set_audio_file(
            Some(main.as_slice()),
            Some(&[1u8, 2, 3][..]),
            &Pcm16Decoder::mono(1_000),
        );
        assert!(matches!(result, Err(MetronomeError::DecodeError { .. })));
        assert_eq!(backend.scheduled_buffers().len(), 1);
        assert_eq!(backend.current_buffer().unwrap().samples(), before.samples());
    }

    #[test]
    fn test_set_audio_file_with_nothing_supplied_is_noop() {
        let (metronome, backend) = engine_with(&app_config(120, 2, 0));
        metronome.play(None).unwrap();
        metronome
            .set_audio_file(None, Some(&[][..]), &Pcm16Decoder::mono(1_000))
            .unwrap();
        assert_eq!(backend.scheduled_buffers().len(), 1);
    }

    #[test]
    fn test_set_audio_file_replaces_accent_and_restarts() {
        let (metronome, backend) = engine_with(&app_config(120, 2, 0));
        metronome.play(None).unwrap();

        let accented = pcm16(&[i16::MAX; 4]);
        metronome
            .set_audio_file(None, Some(accented.as_slice()), &Pcm16Decoder::mono(1_000))
            .unwrap();
        let bar = backend.current_buffer().unwrap();
        assert_eq!(backend.scheduled_buffers().len(), 2);
        assert_eq!(bar.beat(0).unwrap()[0], 1.0);
        assert_eq!(bar.beat(1).unwrap()[0], 0.5);
    }

    #[test]
    fn test_volume_is_clamped_and_forwarded() {
        let (metronome, backend) = engine_with(&app_config(120, 4, 0));
        assert_eq!(backend.output_volume(), 0.5);
        assert_eq!(metronome.volume_percent(), 50);

        metronome.set_volume(1.7).unwrap();
        assert_eq!(metronome.volume(), 1.0);
        assert_eq!(backend.output_volume(), 1.0);

        metronome.set_volume(-0.2).unwrap();
        assert_eq!(metronome.volume_percent(), 0);

        metronome.set_volume(0.555).unwrap();
        assert_eq!(metronome.volume_percent(), 55);
        metronome.set_volume(0.999).unwrap();
        assert_eq!(metronome.volume_percent(), 99);
    }

    #[test]
    fn test_destroy_is_idempotent_and_blocks_play() {
        let (metronome, backend) = engine_with(&app_config(120, 4, 0));
        metronome.play(None).unwrap();

        metronome.destroy().unwrap();
        metronome.destroy().unwrap();
        assert_eq!(backend.shutdown_count(), 1);
        assert!(!metronome.is_playing());
        assert!(matches!(
            metronome.play(None),
            Err(MetronomeError::EngineStartFailure { .. })
        ));
    }

    #[test]
    fn test_interruption_pauses() {
        let metronome = {
            let (metronome, _) = engine_with(&app_config(120, 4, 0));
            Arc::new(metronome)
        };
        let session = RecordingSession::default();
        metronome.attach_session(&session);

        metronome.play(None).unwrap();
        session.interrupt();
        assert!(!metronome.is_playing());
        assert!(metronome.poll().unwrap().is_none());
    }

    #[test]
    fn test_route_change_restarts_renderer_and_resumes_with_pre_count() {
        let backend = Arc::new(ManualPlaybackEngine::new());
        let assets = ClickAssetSet::from_main(ClickSound::mono(1_000, vec![0.5; 20]));
        let metronome = Arc::new(
            MetronomeEngine::new(&app_config(120, 3, 1), assets, backend.clone()).unwrap(),
        );
        let session = RecordingSession::default();
        metronome.attach_session(&session);
        let (sink, mut rx) = tick_channel();
        metronome.enable_tick_callback(sink).unwrap();

        metronome.play(Some(0)).unwrap();
        assert_eq!(rx.try_recv().unwrap().tick, 0);

        session.change_route();
        assert_eq!(backend.shutdown_count(), 1);
        assert_eq!(backend.start_count(), 2);
        assert!(metronome.is_playing());
        assert_eq!(rx.try_recv().unwrap().tick, -3);
    }

    #[test]
    fn test_route_change_while_stopped_does_not_resume() {
        let metronome = {
            let (metronome, _) = engine_with(&app_config(120, 4, 0));
            Arc::new(metronome)
        };
        let session = RecordingSession::default();
        metronome.attach_session(&session);

        session.change_route();
        assert!(!metronome.is_playing());
        assert_eq!(metronome.snapshot().state, SchedulerState::Stopped);
    }
}
