//! Click sounds and the four-slot asset set
//!
//! A [`ClickSound`] is an immutable, decoded sample buffer. [`ClickAssetSet`]
//! holds the main, accented and pre-count variants and resolves the fallback
//! rules once, at construction and on every update, so bar synthesis never
//! has to re-resolve them.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Duration of the generated default click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

/// Immutable decoded sample buffer with interleaved f32 samples.
///
/// Cloning is cheap: the samples are shared, so fallback slots alias the
/// sound they fall back to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickSound {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl ClickSound {
    /// Create a click sound from interleaved samples.
    ///
    /// A channel count of zero is treated as mono. Trailing samples that do
    /// not form a whole frame are dropped.
    pub fn new(channels: u16, sample_rate: u32, mut samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            channels,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Mono click sound.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(1, sample_rate, samples)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// True when both values share the same sample storage.
    pub fn shares_samples_with(&self, other: &ClickSound) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

/// The four concrete sounds used for synthesis, after fallbacks.
#[derive(Debug, Clone)]
pub struct ResolvedClicks {
    pub main: ClickSound,
    pub accented: ClickSound,
    pub pre_count_main: ClickSound,
    pub pre_count_accented: ClickSound,
}

impl ResolvedClicks {
    /// `(main, accented)` pair for a normal or pre-count bar.
    pub fn pair(&self, use_pre_count: bool) -> (&ClickSound, &ClickSound) {
        if use_pre_count {
            (&self.pre_count_main, &self.pre_count_accented)
        } else {
            (&self.main, &self.accented)
        }
    }
}

/// Main, accented and pre-count click sounds with fallback resolution.
///
/// Fallbacks: a missing `accented` aliases `main`; a missing pre-count
/// variant aliases the corresponding (resolved) non-pre-count variant.
#[derive(Debug, Clone)]
pub struct ClickAssetSet {
    main: ClickSound,
    accented: Option<ClickSound>,
    pre_count_main: Option<ClickSound>,
    pre_count_accented: Option<ClickSound>,
    resolved: ResolvedClicks,
}

impl ClickAssetSet {
    pub fn new(
        main: ClickSound,
        accented: Option<ClickSound>,
        pre_count_main: Option<ClickSound>,
        pre_count_accented: Option<ClickSound>,
    ) -> Self {
        let resolved = Self::resolve_slots(&main, &accented, &pre_count_main, &pre_count_accented);
        Self {
            main,
            accented,
            pre_count_main,
            pre_count_accented,
            resolved,
        }
    }

    /// Asset set with only a main click; every other slot aliases it.
    pub fn from_main(main: ClickSound) -> Self {
        Self::new(main, None, None, None)
    }

    /// The four sounds to use, with fallbacks applied.
    pub fn resolve(&self) -> &ResolvedClicks {
        &self.resolved
    }

    /// Replace only the supplied slots and re-resolve fallbacks.
    ///
    /// Returns `false` (and changes nothing) when neither slot is supplied.
    pub fn update(&mut self, main: Option<ClickSound>, accented: Option<ClickSound>) -> bool {
        if main.is_none() && accented.is_none() {
            return false;
        }
        if let Some(main) = main {
            self.main = main;
        }
        if accented.is_some() {
            self.accented = accented;
        }
        self.resolved = Self::resolve_slots(
            &self.main,
            &self.accented,
            &self.pre_count_main,
            &self.pre_count_accented,
        );
        true
    }

    fn resolve_slots(
        main: &ClickSound,
        accented: &Option<ClickSound>,
        pre_count_main: &Option<ClickSound>,
        pre_count_accented: &Option<ClickSound>,
    ) -> ResolvedClicks {
        let accented = accented.clone().unwrap_or_else(|| main.clone());
        ResolvedClicks {
            main: main.clone(),
            pre_count_main: pre_count_main.clone().unwrap_or_else(|| main.clone()),
            pre_count_accented: pre_count_accented
                .clone()
                .unwrap_or_else(|| accented.clone()),
            accented,
        }
    }
}

/// Generates a default metronome click (20ms white noise burst).
///
/// The noise uses a fixed seed so the output is identical across calls.
/// Used when no click file is supplied.
pub fn generate_click_sample(sample_rate: u32) -> ClickSound {
    let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;

    let mut rng = StdRng::seed_from_u64(42);

    let mut samples = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        samples.push(rng.gen_range(-1.0..1.0));
    }

    ClickSound::mono(sample_rate, samples)
}
