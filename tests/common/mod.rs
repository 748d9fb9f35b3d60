//! Test infrastructure for pcm-player integration tests.
//!
//! Drives an in-process [`SoftwareDevice`] by hand so tests decide exactly
//! how much audio the "hardware" has consumed.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use pcm_player::error::AudioError;
pub use pcm_player::event::{Dispatcher, Event, Subscriber};
pub use pcm_player::mixer::SoftwareDevice;
pub use pcm_player::playback::{AudioPlayer, PlayerSettings, PlayerState, SessionOutcome};
pub use pcm_player::sources::wav::WavSource;
pub use pcm_player::sources::AudioSource;

use tokio::task::JoinHandle;

/// Device rate used by the harness. Sources at the same rate advance one
/// frame per rendered frame.
pub const RATE: u32 = 1000;

/// Frames rendered per pump
pub const PUMP: usize = 32;

/// Time given to the player's tasks to react
pub const STEP: Duration = Duration::from_millis(20);

pub struct Harness {
    pub device: Arc<SoftwareDevice>,
    pub dispatcher: Dispatcher,
    pub events: Subscriber,
    pub player: AudioPlayer,
    /// Everything delivered by previous ticks
    pub seen: Vec<Event>,
}

impl Harness {
    pub fn new(buffer_size: usize) -> Self {
        let device = Arc::new(SoftwareDevice::new(RATE).unwrap());
        let dispatcher = Dispatcher::new(1000);
        let events = dispatcher.subscribe();
        let player = AudioPlayer::new(device.clone(), dispatcher.queue(), settings(buffer_size))
            .unwrap();

        Self {
            device,
            dispatcher,
            events,
            player,
            seen: Vec::new(),
        }
    }

    /// Renders `frames` frames of output.
    pub fn pump(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        self.device.render(&mut out);
        out
    }

    /// Delivers queued events and returns the new ones.
    pub fn tick(&mut self) -> Vec<Event> {
        self.dispatcher.tick();
        let events = self.events.drain();
        self.seen.extend(events.iter().cloned());
        events
    }

    /// Pumps and ticks until an event matching `pred` arrives. Panics after
    /// `steps` attempts.
    pub async fn pump_until(&mut self, steps: usize, pred: impl Fn(&Event) -> bool) -> Event {
        for _ in 0..steps {
            self.pump(PUMP);
            tokio::time::sleep(STEP).await;

            if let Some(event) = self.tick().into_iter().find(|e| pred(e)) {
                return event;
            }
        }

        panic!("event not seen, got {:?}", self.seen);
    }

    /// Ticks without rendering until an event matching `pred` arrives.
    pub async fn wait_for(&mut self, steps: usize, pred: impl Fn(&Event) -> bool) -> Event {
        for _ in 0..steps {
            tokio::time::sleep(STEP).await;

            if let Some(event) = self.tick().into_iter().find(|e| pred(e)) {
                return event;
            }
        }

        panic!("event not seen, got {:?}", self.seen);
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }
}

pub fn settings(buffer_size: usize) -> PlayerSettings {
    PlayerSettings {
        buffer_size,
        poll_interval: Duration::from_millis(1),
    }
}

/// Renders `device` in the background, like a sound card would.
pub fn start_render_loop(device: Arc<SoftwareDevice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = vec![0.0; PUMP * 2];
        loop {
            device.render(&mut out);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
}

/// A mono ramp 0, 1, 2, ... so positions are easy to recognize in output.
pub fn ramp_source(samples: usize) -> Arc<dyn AudioSource> {
    let samples = (0..samples).map(|i| i as i16).collect();
    Arc::new(WavSource::from_samples(1, RATE, samples).unwrap())
}

/// Writes a 16-bit WAV file with hound.
pub fn write_wav(dir: &Path, name: &str, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in samples {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();

    path
}

/// In-memory 16-bit WAV bytes.
pub fn wav_bytes(channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    cursor.into_inner()
}

pub fn is_start(event: &Event) -> bool {
    matches!(event, Event::StartPlaying(_))
}

pub fn is_stop(event: &Event) -> bool {
    matches!(event, Event::StopPlaying(_))
}

pub fn is_finish(event: &Event) -> bool {
    matches!(event, Event::FinishPlaying(_))
}

pub fn is_loop(event: &Event) -> bool {
    matches!(event, Event::Loop(_))
}
