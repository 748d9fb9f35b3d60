//! Audio source abstraction for the playback engine.
//!
//! All audio sources implement the `AudioSource` trait, which provides
//! a pull-based interface for reading interleaved 16-bit samples at an
//! absolute offset.

use std::time::Duration;

pub mod sine;
pub mod symphonia;
pub mod wav;

/// A single interleaved PCM sample.
pub type Sample = i16;

/// Outcome of a [`AudioSource::fill_samples`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillResult {
    /// Number of samples written to the start of the destination
    pub written: usize,

    /// No samples exist past `offset + written`
    pub is_final: bool,
}

/// Trait for audio sources that can produce samples on demand.
///
/// Offsets and lengths are counted in interleaved samples, so a stereo
/// frame is two samples. Sources keep no read cursor: the caller passes
/// the absolute offset it wants, which makes looping and seeking a matter
/// of passing a smaller offset.
pub trait AudioSource: Send + Sync {
    /// Total number of interleaved samples, or `None` while still unknown.
    fn total_samples(&self) -> Option<usize>;

    fn channels(&self) -> u16;

    /// Bit depth of the original data. Samples are always delivered as 16-bit.
    fn bits_per_sample(&self) -> u16;

    fn sample_rate(&self) -> u32;

    /// Copy up to `dest.len()` samples starting at `offset` into `dest`.
    ///
    /// `is_final` is set when the copy came up short because the stream
    /// ended. A short copy from a source that is still loading is not final.
    fn fill_samples(&self, dest: &mut [Sample], offset: usize) -> FillResult;

    /// Set once the source has given up because of an error. Samples
    /// already delivered stay valid, but the stream is incomplete.
    fn error(&self) -> Option<String> {
        None
    }

    /// Length in frames, 0 while unknown.
    fn total_frames(&self) -> usize {
        self.total_samples().unwrap_or(0) / self.channels().max(1) as usize
    }
}

/// Converts a frame count at `sample_rate` to a duration.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }

    let secs = frames / sample_rate as u64;
    let rem = frames % sample_rate as u64;
    Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / sample_rate as u64)
}

/// Bounded copy from a fully known sample buffer.
pub(crate) fn copy_from(samples: &[Sample], dest: &mut [Sample], offset: usize) -> FillResult {
    let available = samples.len().saturating_sub(offset);
    let written = dest.len().min(available);

    if written > 0 {
        dest[..written].copy_from_slice(&samples[offset..offset + written]);
    }

    // An exactly filled destination is not final; the next call returns an
    // empty final chunk
    FillResult {
        written,
        is_final: written < dest.len(),
    }
}
