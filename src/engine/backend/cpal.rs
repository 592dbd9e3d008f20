//! CPAL-based playback engine for desktop platforms (Linux, macOS, Windows)
//!
//! The output stream lives on a dedicated host thread so the non-`Send`
//! `cpal::Stream` never crosses threads. Loop buffers reach the real-time
//! callback over an rtrb SPSC queue; buffers the callback stops using travel
//! back over a second queue and are dropped on the control side, keeping the
//! callback free of allocation and deallocation.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio::BarBuffer;
use crate::error::MetronomeError;

use super::PlaybackEngine;

/// Capacity of the command and retired-buffer queues
const QUEUE_CAPACITY: usize = 8;

/// `loop_start` value while the scheduled buffer has not rendered yet
const LOOP_PENDING: u64 = u64::MAX;

enum RenderCommand {
    Loop(Arc<BarBuffer>),
    Clear,
}

/// State shared between the control side and the audio callback
struct RenderShared {
    /// Frames rendered since the stream started (hardware clock)
    frame_counter: AtomicU64,
    playing: AtomicBool,
    running: AtomicBool,
    /// f32 volume stored as bits
    volume: AtomicU32,
    /// `frame_counter` value at the first audible frame of the current loop
    loop_start: AtomicU64,
}

impl RenderShared {
    fn new(active: bool) -> Self {
        Self {
            frame_counter: AtomicU64::new(0),
            playing: AtomicBool::new(active),
            running: AtomicBool::new(active),
            volume: AtomicU32::new(1.0f32.to_bits()),
            loop_start: AtomicU64::new(LOOP_PENDING),
        }
    }
}

/// Control-side ends of the render queues
struct ControlChannels {
    commands: Producer<RenderCommand>,
    retired: Consumer<Arc<BarBuffer>>,
}

impl ControlChannels {
    fn drain_retired(&mut self) {
        while self.retired.pop().is_ok() {}
    }
}

struct HostThread {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Playback engine that loops bar buffers on the default output device.
pub struct CpalPlaybackEngine {
    sample_rate: u32,
    shared: Arc<RenderShared>,
    control: Mutex<Option<ControlChannels>>,
    host: Mutex<Option<HostThread>>,
}

impl CpalPlaybackEngine {
    /// Create an engine that opens the output stream at `sample_rate`.
    ///
    /// No device is touched until [`PlaybackEngine::start`].
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            shared: Arc::new(RenderShared::new(false)),
            control: Mutex::new(None),
            host: Mutex::new(None),
        }
    }

    fn control(&self) -> MutexGuard<'_, Option<ControlChannels>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: RenderCommand) -> Result<(), MetronomeError> {
        let mut guard = self.control();
        let channels = guard
            .as_mut()
            .ok_or_else(|| MetronomeError::EngineStartFailure {
                reason: "output stream not started".to_string(),
            })?;
        channels.drain_retired();
        channels
            .commands
            .push(command)
            .map_err(|_| MetronomeError::EngineStartFailure {
                reason: "render command queue full".to_string(),
            })
    }

    fn build_stream(
        sample_rate: u32,
        mut renderer: LoopRenderer,
    ) -> Result<::cpal::Stream, MetronomeError> {
        let host = ::cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MetronomeError::EngineStartFailure {
                reason: "No default output device found".to_string(),
            })?;

        let config = device
            .default_output_config()
            .map_err(|e| MetronomeError::EngineStartFailure {
                reason: format!("Failed to get default output config: {:?}", e),
            })?;

        let stream_config = ::cpal::StreamConfig {
            channels: config.channels(),
            sample_rate: ::cpal::SampleRate(sample_rate),
            buffer_size: ::cpal::BufferSize::Default,
        };
        renderer.output_channels = stream_config.channels.max(1) as usize;

        let err_fn = |err| tracing::error!("[CpalPlayback] Output stream error: {}", err);

        let stream = match config.sample_format() {
            ::cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &::cpal::OutputCallbackInfo| renderer.render(data),
                err_fn,
                None,
            ),
            _ => {
                return Err(MetronomeError::EngineStartFailure {
                    reason: "Only F32 sample format is currently supported for output"
                        .to_string(),
                })
            }
        }
        .map_err(|e| MetronomeError::EngineStartFailure {
            reason: format!("{:?}", e),
        })?;

        stream.play().map_err(|e| MetronomeError::EngineStartFailure {
            reason: format!("Output start failed: {}", e),
        })?;

        Ok(stream)
    }
}

impl PlaybackEngine for CpalPlaybackEngine {
    fn start(&self) -> Result<(), MetronomeError> {
        let mut host_guard = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        if host_guard.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = RingBuffer::new(QUEUE_CAPACITY);
        let (retired_tx, retired_rx) = RingBuffer::new(QUEUE_CAPACITY);
        let renderer = LoopRenderer {
            shared: Arc::clone(&self.shared),
            commands: command_rx,
            retired: retired_tx,
            current: None,
            position: 0,
            start_pending: false,
            output_channels: 1,
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sample_rate = self.sample_rate;

        let handle = std::thread::Builder::new()
            .name("metronome-render".to_string())
            .spawn(move || {
                let stream = match Self::build_stream(sample_rate, renderer) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until shutdown is requested or the engine is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| MetronomeError::EngineStartFailure {
                reason: format!("Failed to spawn render thread: {}", e),
            })?;

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| {
                Err(MetronomeError::EngineStartFailure {
                    reason: "render thread exited before reporting".to_string(),
                })
            });
        if let Err(err) = outcome {
            let _ = handle.join();
            return Err(err);
        }

        *self.control() = Some(ControlChannels {
            commands: command_tx,
            retired: retired_rx,
        });
        self.shared.running.store(true, Ordering::SeqCst);
        *host_guard = Some(HostThread {
            shutdown_tx,
            handle,
        });

        tracing::info!(
            "[CpalPlayback] Output stream started at {} Hz",
            self.sample_rate
        );
        Ok(())
    }

    fn schedule_looped(&self, buffer: Arc<BarBuffer>) -> Result<(), MetronomeError> {
        self.shared.loop_start.store(LOOP_PENDING, Ordering::SeqCst);
        self.send(RenderCommand::Loop(buffer))
    }

    fn play(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.playing.store(true, Ordering::SeqCst);
        }
    }

    fn stop(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        let _ = self.send(RenderCommand::Clear);
    }

    fn reset(&self) {
        let _ = self.send(RenderCommand::Clear);
    }

    fn set_output_volume(&self, volume: f32) {
        self.shared.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.is_running() && self.shared.playing.load(Ordering::SeqCst)
    }

    fn sample_time(&self) -> Option<u64> {
        self.is_running()
            .then(|| self.shared.frame_counter.load(Ordering::Acquire))
    }

    fn loop_start_time(&self) -> Option<u64> {
        let start = self.shared.loop_start.load(Ordering::Acquire);
        (self.is_running() && start != LOOP_PENDING).then_some(start)
    }

    fn shutdown(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);

        let host = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(host) = host {
            let _ = host.shutdown_tx.send(());
            let _ = host.handle.join();
            tracing::info!("[CpalPlayback] Output stream released");
        }
        *self.control() = None;
    }
}

impl Drop for CpalPlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Real-time side: loops the current bar buffer into the device buffer.
struct LoopRenderer {
    shared: Arc<RenderShared>,
    commands: Consumer<RenderCommand>,
    retired: Producer<Arc<BarBuffer>>,
    current: Option<Arc<BarBuffer>>,
    /// Frame position within `current`
    position: usize,
    /// `current` has not produced an audible frame yet
    start_pending: bool,
    output_channels: usize,
}

impl LoopRenderer {
    fn render(&mut self, data: &mut [f32]) {
        // Real-time audio callback - no allocations, locks or blocking.
        while let Ok(command) = self.commands.pop() {
            self.retire_current();
            if let RenderCommand::Loop(buffer) = command {
                self.current = Some(buffer);
                self.start_pending = true;
            }
        }

        let playing = self.shared.playing.load(Ordering::Relaxed);
        let volume = f32::from_bits(self.shared.volume.load(Ordering::Relaxed));
        let out_channels = self.output_channels;
        let frame_count = data.len() / out_channels;

        match self.current.as_ref() {
            Some(buffer) if playing && buffer.frames() > 0 => {
                if self.start_pending {
                    let now = self.shared.frame_counter.load(Ordering::Relaxed);
                    self.shared.loop_start.store(now, Ordering::Release);
                    self.start_pending = false;
                }
                let src_channels = buffer.channels() as usize;
                let samples = buffer.samples();
                for frame in data.chunks_mut(out_channels) {
                    let base = self.position * src_channels;
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        *sample = samples[base + ch % src_channels] * volume;
                    }
                    self.position += 1;
                    if self.position >= buffer.frames() {
                        self.position = 0;
                    }
                }
            }
            _ => data.fill(0.0),
        }

        self.shared
            .frame_counter
            .fetch_add(frame_count as u64, Ordering::Release);
    }

    fn retire_current(&mut self) {
        self.position = 0;
        self.start_pending = false;
        if let Some(old) = self.current.take() {
            // A full retire queue means the control side stopped draining; the
            // buffer is then freed here as a last resort.
            let _ = self.retired.push(old);
        }
    }
}
