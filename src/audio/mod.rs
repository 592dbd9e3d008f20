// Audio module - click sounds, decoding and bar buffer synthesis

pub mod click;
pub mod decoder;
pub mod synth;

// Re-export commonly used types for convenience
pub use click::{generate_click_sample, ClickAssetSet, ClickSound, ResolvedClicks};
pub use decoder::{AudioDecoder, Pcm16Decoder, WavDecoder};
pub use synth::{beat_length, synthesize, BarBuffer};
