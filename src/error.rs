//! Error types for the playback engine.

use crate::device::{BufferId, VoiceId};
use thiserror::Error;

/// Errors reported by an [`OutputDevice`](crate::device::OutputDevice).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("unknown voice {0:?}")]
    UnknownVoice(VoiceId),

    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),

    /// Buffer data can't be replaced while the buffer sits in a voice queue
    #[error("buffer {0:?} is queued on a voice")]
    BufferInUse(BufferId),

    #[error("voice {voice:?} has {processed} processed buffers, {requested} requested")]
    NotEnoughProcessed {
        voice: VoiceId,
        processed: usize,
        requested: usize,
    },

    #[error("device backend error: {0}")]
    Backend(String),
}

/// Main error type for the engine and its sources.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Container declares a channel count, bit depth or encoding we can't play
    #[error("unsupported format: {channels} channels, {bits_per_sample} bits, format tag {format_tag:#06x}")]
    UnsupportedFormat {
        channels: u16,
        bits_per_sample: u16,
        format_tag: u16,
    },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// One-shot playback needs to know the full length up front
    #[error("source length is not known yet")]
    IndeterminateLength,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// A source stopped producing samples because of an error
    #[error("source failed: {0}")]
    SourceFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

/// Convenience Result type using [`AudioError`]
pub type Result<T> = std::result::Result<T, AudioError>;
