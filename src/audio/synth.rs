//! Bar buffer synthesis
//!
//! Assembles one bar of interleaved audio from per-beat click renders:
//! - beat length is `round(sample_rate * 60 / bpm)` frames (at least 1)
//! - each beat is the click copied from its start, zero-filled to the beat length
//! - the downbeat uses the accented click when the bar has two or more beats
//!
//! Synthesis is pure: it reads the asset set and allocates a fresh buffer.

use crate::audio::click::{ClickAssetSet, ClickSound};
use crate::error::MetronomeError;

/// One bar of interleaved samples, handed to the renderer for looping.
#[derive(Debug, Clone, PartialEq)]
pub struct BarBuffer {
    channels: u16,
    sample_rate: u32,
    beat_length: usize,
    samples: Vec<f32>,
}

impl BarBuffer {
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per beat used to build this bar.
    pub fn beat_length(&self) -> usize {
        self.beat_length
    }

    /// Total frames in the bar.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Number of beats rendered into the bar.
    pub fn beats(&self) -> usize {
        self.frames() / self.beat_length
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Interleaved samples for beat `index`, or `None` past the last beat.
    pub fn beat(&self, index: usize) -> Option<&[f32]> {
        let width = self.beat_length * self.channels as usize;
        let start = index.checked_mul(width)?;
        self.samples.get(start..start.checked_add(width)?)
    }
}

/// Frames per beat: `round(sample_rate * 60 / bpm)`, minimum 1.
///
/// # Errors
/// `InvalidParameter` when `bpm` is zero.
pub fn beat_length(bpm: u32, sample_rate: u32) -> Result<usize, MetronomeError> {
    if bpm == 0 {
        return Err(MetronomeError::InvalidParameter {
            name: "bpm",
            value: bpm as i64,
        });
    }
    let frames = (sample_rate as f64 * 60.0 / bpm as f64).round() as usize;
    Ok(frames.max(1))
}

/// Synthesize one bar buffer.
///
/// Uses the pre-count click pair when `use_pre_count` is set. A
/// `time_signature` of 0 or 1 produces a single unaccented beat meant to be
/// looped; anything larger produces `time_signature` beats with the accented
/// click on beat 0. The bar takes its channel layout from the main click.
pub fn synthesize(
    assets: &ClickAssetSet,
    bpm: u32,
    time_signature: u32,
    sample_rate: u32,
    use_pre_count: bool,
) -> Result<BarBuffer, MetronomeError> {
    let (main_click, accented_click) = assets.resolve().pair(use_pre_count);
    let beat_length = beat_length(bpm, sample_rate)?;
    let channels = main_click.channels();

    if main_click.sample_rate() != sample_rate {
        tracing::debug!(
            "[BarSynth] Click sample rate {} differs from engine rate {}; no resampling applied",
            main_click.sample_rate(),
            sample_rate
        );
    }

    let main_beat = render_beat(main_click, beat_length, channels);

    let samples = if time_signature < 2 {
        main_beat
    } else {
        let accented_beat = render_beat(accented_click, beat_length, channels);
        let mut bar = Vec::with_capacity(main_beat.len() * time_signature as usize);
        bar.extend_from_slice(&accented_beat);
        for _ in 1..time_signature {
            bar.extend_from_slice(&main_beat);
        }
        bar
    };

    Ok(BarBuffer {
        channels,
        sample_rate,
        beat_length,
        samples,
    })
}

/// Render exactly `beat_length` frames of `click` with `channels` channels.
///
/// Frames past the end of the click are silent. When channel counts differ,
/// output channel `c` reads source channel `c % source_channels`.
fn render_beat(click: &ClickSound, beat_length: usize, channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    let mut beat = vec![0.0f32; beat_length * channels];
    let copy_frames = click.frames().min(beat_length);
    let source = click.samples();
    let source_channels = click.channels() as usize;

    if source_channels == channels {
        let n = copy_frames * channels;
        beat[..n].copy_from_slice(&source[..n]);
    } else {
        for frame in 0..copy_frames {
            for ch in 0..channels {
                beat[frame * channels + ch] = source[frame * source_channels + ch % source_channels];
            }
        }
    }

    beat
}
