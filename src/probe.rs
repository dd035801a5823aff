//! Audio file probing.
//!
//! The repair needs two facts about the audio behind an annotation: the sample
//! rate the beat frames are expressed in, and the track length in frames. Both
//! come from the container header; nothing is decoded.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;

/// Source of sample rate and duration for an audio file.
pub trait AudioProbe {
    fn sample_rate(&self, audio: &Path) -> Result<u32>;

    /// Length of `audio` in frames at `sample_rate`.
    fn duration_samples(&self, audio: &Path, sample_rate: u32) -> Result<i64>;
}

/// Reads container headers with symphonia.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaProbe;

impl SymphoniaProbe {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn codec_params(audio: &Path) -> Result<CodecParameters> {
        let file = File::open(audio).with_context(|| format!("Failed to open {}", audio.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = audio.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("Unrecognized audio format: {}", audio.display()))?;
        let track = probed
            .format
            .default_track()
            .ok_or_else(|| anyhow!("No audio track in {}", audio.display()))?;
        Ok(track.codec_params.clone())
    }
}

impl AudioProbe for SymphoniaProbe {
    fn sample_rate(&self, audio: &Path) -> Result<u32> {
        Self::codec_params(audio)?
            .sample_rate
            .ok_or_else(|| anyhow!("Sample rate not declared in {}", audio.display()))
    }

    fn duration_samples(&self, audio: &Path, sample_rate: u32) -> Result<i64> {
        let params = Self::codec_params(audio)?;
        let frames = params
            .n_frames
            .ok_or_else(|| anyhow!("Frame count not declared in {}", audio.display()))?;
        let native_rate = params.sample_rate.unwrap_or(sample_rate);
        Ok(rescale_frames(frames, native_rate, sample_rate))
    }
}

/// Convert a frame count between sample rates, rounding down.
#[must_use]
pub fn rescale_frames(frames: u64, from_rate: u32, to_rate: u32) -> i64 {
    if from_rate == to_rate || from_rate == 0 {
        return i64::try_from(frames).unwrap_or(i64::MAX);
    }
    let scaled = u128::from(frames) * u128::from(to_rate) / u128::from(from_rate);
    i64::try_from(scaled).unwrap_or(i64::MAX)
}

/// Frames covered by `milliseconds` of audio at `sample_rate`.
#[must_use]
pub fn frames_from_millis(milliseconds: i64, sample_rate: u32) -> i64 {
    milliseconds.saturating_mul(i64::from(sample_rate)) / 1000
}
