//! Output device contract.
//!
//! The playback engine talks to audio hardware through this narrow,
//! OpenAL-shaped interface: voices play a queue of buffers, buffers hold
//! uploaded PCM, and the engine polls for processed buffers to refill.
//! [`SoftwareDevice`](crate::mixer::SoftwareDevice) is the in-process
//! implementation shipped with the crate.

use crate::error::DeviceError;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Layout of the bytes handed to [`OutputDevice::buffer_data`].
///
/// 8-bit data is unsigned with a midpoint of 128, 16-bit data is signed
/// little-endian. Stereo data is interleaved left/right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl BufferFormat {
    pub fn new(channels: u16, bits_per_sample: u16) -> Option<Self> {
        match (channels, bits_per_sample) {
            (1, 8) => Some(BufferFormat::Mono8),
            (1, 16) => Some(BufferFormat::Mono16),
            (2, 8) => Some(BufferFormat::Stereo8),
            (2, 16) => Some(BufferFormat::Stereo16),
            _ => None,
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            BufferFormat::Mono8 | BufferFormat::Mono16 => 1,
            BufferFormat::Stereo8 | BufferFormat::Stereo16 => 2,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            BufferFormat::Mono8 | BufferFormat::Stereo8 => 1,
            BufferFormat::Mono16 | BufferFormat::Stereo16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// Created but never played
    #[default]
    Initial,
    Playing,
    Paused,
    /// Stopped explicitly or ran out of queued buffers
    Stopped,
}

/// A native audio backend the engine can drive.
///
/// Every method takes `&self`; implementations synchronize internally so a
/// device can be shared between the streaming session, one-shot voices and
/// whatever thread renders the audio.
pub trait OutputDevice: Send + Sync {
    fn create_voice(&self) -> DeviceResult<VoiceId>;

    /// Destroys the voice, implicitly unqueueing all of its buffers
    fn destroy_voice(&self, voice: VoiceId) -> DeviceResult<()>;

    fn create_buffer(&self) -> DeviceResult<BufferId>;

    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()>;

    /// Replaces the contents of `buffer` with `data` in the given format
    fn buffer_data(
        &self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> DeviceResult<()>;

    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) -> DeviceResult<()>;

    /// Removes `count` processed buffers from the front of the voice queue
    fn unqueue_buffers(&self, voice: VoiceId, count: usize) -> DeviceResult<Vec<BufferId>>;

    /// Number of buffers at the front of the queue that finished playing
    fn buffers_processed(&self, voice: VoiceId) -> DeviceResult<usize>;

    fn buffers_queued(&self, voice: VoiceId) -> DeviceResult<usize>;

    /// The buffer currently being played, if any
    fn current_buffer(&self, voice: VoiceId) -> DeviceResult<Option<BufferId>>;

    fn set_gain(&self, voice: VoiceId, gain: f32) -> DeviceResult<()>;

    fn set_pitch(&self, voice: VoiceId, pitch: f32) -> DeviceResult<()>;

    /// Places the voice in 3D space relative to the listener
    fn set_position(&self, voice: VoiceId, position: [f32; 3]) -> DeviceResult<()>;

    fn play(&self, voice: VoiceId) -> DeviceResult<()>;

    fn pause(&self, voice: VoiceId) -> DeviceResult<()>;

    fn stop(&self, voice: VoiceId) -> DeviceResult<()>;

    fn voice_state(&self, voice: VoiceId) -> DeviceResult<VoiceState>;

    /// Playback offset in frames within the current buffer
    fn sample_offset(&self, voice: VoiceId) -> DeviceResult<usize>;
}

/// Maps a pan value onto a listener-relative position.
///
/// The voice sits on the unit circle in front of the listener, which gives
/// constant-power panning on positional backends.
pub fn pan_position(pan: f32) -> [f32; 3] {
    let x = pan.clamp(-1.0, 1.0);
    let z = if x.abs() < 1.0 {
        (1.0 - x * x).sqrt()
    } else {
        0.0
    };

    [x, 0.0, z]
}
