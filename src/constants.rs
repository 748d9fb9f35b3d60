use std::time::Duration;

// Define some constants for the audio parameters
pub const SAMPLE_RATE: u32 = 44100; // 44.1 kHz device rate
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 2; // Stereo output

/// Samples per streaming chunk, two of these are queued at a time
pub const BUFFER_SIZE: usize = 8192;

/// How often the playback loop polls the device
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Step between gain updates while fading out
pub const FADE_STEP: Duration = Duration::from_millis(10);
