//! In-process output device.
//!
//! `SoftwareDevice` implements the [`OutputDevice`] contract by mixing every
//! playing voice into interleaved stereo frames whenever [`render`] is
//! called. Something has to call `render` at the device rate: the clock
//! task in this module (feeding [`crate::net`]) or a sound card callback
//! ([`crate::output`]).
//!
//! [`render`]: SoftwareDevice::render

use crate::device::{BufferFormat, BufferId, DeviceResult, OutputDevice, VoiceId, VoiceState};
use crate::error::{AudioError, DeviceError};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const TARGET_CHUNK_SIZE: usize = 128;

/// A stereo frame (left, right) as 16-bit signed integers.
pub type Frame = (i16, i16);
pub type MixerOutput = watch::Receiver<Vec<Frame>>;

struct BufferData {
    channels: u16,
    sample_rate: u32,
    /// Interleaved samples normalized to [-1, 1]
    samples: Vec<f32>,
}

impl BufferData {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    fn frame(&self, index: usize) -> (f32, f32) {
        match self.channels {
            1 => {
                let s = self.samples[index];
                (s, s)
            }
            _ => (self.samples[index * 2], self.samples[index * 2 + 1]),
        }
    }
}

struct Voice {
    state: VoiceState,
    gain: f32,
    pitch: f32,
    position: [f32; 3],
    queue: VecDeque<BufferId>,
    /// Buffers at the front of `queue` that finished playing
    processed: usize,
    /// Fractional frame position in the current buffer
    cursor: f64,
}

impl Default for Voice {
    fn default() -> Self {
        Voice {
            state: VoiceState::Initial,
            gain: 1.0,
            pitch: 1.0,
            position: [0.0, 0.0, 1.0],
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    next_id: u32,
    voices: HashMap<VoiceId, Voice>,
    buffers: HashMap<BufferId, BufferData>,
}

impl DeviceState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn voice(&mut self, voice: VoiceId) -> DeviceResult<&mut Voice> {
        self.voices
            .get_mut(&voice)
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn is_queued(&self, buffer: BufferId) -> bool {
        self.voices.values().any(|v| v.queue.contains(&buffer))
    }
}

pub struct SoftwareDevice {
    sample_rate: u32,
    closed: AtomicBool,
    state: Mutex<DeviceState>,
}

impl SoftwareDevice {
    pub fn new(sample_rate: u32) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::DeviceUnavailable(
                "output sample rate must be positive".to_string(),
            ));
        }

        Ok(SoftwareDevice {
            sample_rate,
            closed: AtomicBool::new(false),
            state: Mutex::new(DeviceState::default()),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Refuses all further voice and buffer creation, as a lost audio
    /// device would.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    fn ensure_open(&self) -> DeviceResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeviceError::Backend("device closed".to_string()));
        }
        Ok(())
    }

    /// Mixes all playing voices into `out`, interleaved stereo at the
    /// device sample rate. Existing contents of `out` are overwritten.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        let mut state = self.state.lock();
        let DeviceState {
            voices, buffers, ..
        } = &mut *state;

        for voice in voices.values_mut() {
            if voice.state == VoiceState::Playing {
                mix_voice(voice, buffers, out, self.sample_rate);
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

fn mix_voice(
    voice: &mut Voice,
    buffers: &HashMap<BufferId, BufferData>,
    out: &mut [f32],
    device_rate: u32,
) {
    for frame in out.chunks_exact_mut(2) {
        let Some(buffer) = settle(voice, buffers) else {
            return;
        };

        let (left, right) = buffer.frame(voice.cursor as usize);
        let (left_gain, right_gain) = pan_gains(voice.position[0], buffer.channels);

        frame[0] += left * left_gain * voice.gain;
        frame[1] += right * right_gain * voice.gain;

        voice.cursor += voice.pitch as f64 * buffer.sample_rate as f64 / device_rate as f64;
    }

    // A buffer counts as processed as soon as its last frame has played
    settle(voice, buffers);
}

/// Skips the buffers the cursor has run past, carrying the fractional
/// overshoot, and returns the buffer now playing. Stops the voice when the
/// queue is exhausted.
fn settle<'a>(
    voice: &mut Voice,
    buffers: &'a HashMap<BufferId, BufferData>,
) -> Option<&'a BufferData> {
    while let Some(id) = voice.queue.get(voice.processed).copied() {
        match buffers.get(&id) {
            Some(buffer) if (voice.cursor as usize) < buffer.frames() => return Some(buffer),
            Some(buffer) => {
                voice.cursor -= buffer.frames() as f64;
                voice.processed += 1;
            }
            None => {
                voice.cursor = 0.0;
                voice.processed += 1;
            }
        }
    }

    // Underrun: everything queued has played
    voice.state = VoiceState::Stopped;
    voice.cursor = 0.0;
    None
}

/// Constant-power left/right gains for a voice at horizontal position `x`.
fn pan_gains(x: f32, channels: u16) -> (f32, f32) {
    let x = x.clamp(-1.0, 1.0);

    if channels == 1 {
        (((1.0 - x) / 2.0).sqrt(), ((1.0 + x) / 2.0).sqrt())
    } else {
        // Stereo data is balanced rather than positioned, so center stays at unity
        ((1.0 - x).sqrt().min(1.0), (1.0 + x).sqrt().min(1.0))
    }
}

impl OutputDevice for SoftwareDevice {
    fn create_voice(&self) -> DeviceResult<VoiceId> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let voice = VoiceId(state.next_id());
        state.voices.insert(voice, Voice::default());

        trace!("Created voice {:?}", voice);
        Ok(voice)
    }

    fn destroy_voice(&self, voice: VoiceId) -> DeviceResult<()> {
        self.state
            .lock()
            .voices
            .remove(&voice)
            .map(|_| trace!("Destroyed voice {:?}", voice))
            .ok_or(DeviceError::UnknownVoice(voice))
    }

    fn create_buffer(&self) -> DeviceResult<BufferId> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let buffer = BufferId(state.next_id());
        state.buffers.insert(
            buffer,
            BufferData {
                channels: 1,
                sample_rate: self.sample_rate,
                samples: Vec::new(),
            },
        );

        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.is_queued(buffer) {
            return Err(DeviceError::BufferInUse(buffer));
        }

        state
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(DeviceError::UnknownBuffer(buffer))
    }

    fn buffer_data(
        &self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> DeviceResult<()> {
        if sample_rate == 0 {
            return Err(DeviceError::Backend("buffer sample rate must be positive".to_string()));
        }

        let samples: Vec<f32> = match format.bytes_per_sample() {
            1 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
            _ => {
                let mut pcm = vec![0i16; data.len() / 2];
                LittleEndian::read_i16_into(&data[..pcm.len() * 2], &mut pcm);
                pcm.into_iter().map(|s| s as f32 / 32768.0).collect()
            }
        };

        let mut state = self.state.lock();
        if state.is_queued(buffer) {
            return Err(DeviceError::BufferInUse(buffer));
        }

        let slot = state
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        *slot = BufferData {
            channels: format.channels(),
            sample_rate,
            samples,
        };

        Ok(())
    }

    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let Some(missing) = buffers.iter().find(|b| !state.buffers.contains_key(*b)) {
            return Err(DeviceError::UnknownBuffer(*missing));
        }

        state.voice(voice)?.queue.extend(buffers.iter().copied());
        Ok(())
    }

    fn unqueue_buffers(&self, voice: VoiceId, count: usize) -> DeviceResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let v = state.voice(voice)?;

        if count > v.processed {
            return Err(DeviceError::NotEnoughProcessed {
                voice,
                processed: v.processed,
                requested: count,
            });
        }

        v.processed -= count;
        Ok(v.queue.drain(..count).collect())
    }

    fn buffers_processed(&self, voice: VoiceId) -> DeviceResult<usize> {
        Ok(self.state.lock().voice(voice)?.processed)
    }

    fn buffers_queued(&self, voice: VoiceId) -> DeviceResult<usize> {
        Ok(self.state.lock().voice(voice)?.queue.len())
    }

    fn current_buffer(&self, voice: VoiceId) -> DeviceResult<Option<BufferId>> {
        let mut state = self.state.lock();
        let v = state.voice(voice)?;
        Ok(v.queue.get(v.processed).copied())
    }

    fn set_gain(&self, voice: VoiceId, gain: f32) -> DeviceResult<()> {
        self.state.lock().voice(voice)?.gain = gain.max(0.0);
        Ok(())
    }

    fn set_pitch(&self, voice: VoiceId, pitch: f32) -> DeviceResult<()> {
        // A non-positive pitch holds the voice in place
        self.state.lock().voice(voice)?.pitch = pitch.max(0.0);
        Ok(())
    }

    fn set_position(&self, voice: VoiceId, position: [f32; 3]) -> DeviceResult<()> {
        self.state.lock().voice(voice)?.position = position;
        Ok(())
    }

    fn play(&self, voice: VoiceId) -> DeviceResult<()> {
        self.state.lock().voice(voice)?.state = VoiceState::Playing;
        Ok(())
    }

    fn pause(&self, voice: VoiceId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let v = state.voice(voice)?;
        if v.state == VoiceState::Playing {
            v.state = VoiceState::Paused;
        }
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let v = state.voice(voice)?;
        v.state = VoiceState::Stopped;
        v.processed = v.queue.len();
        v.cursor = 0.0;
        Ok(())
    }

    fn voice_state(&self, voice: VoiceId) -> DeviceResult<VoiceState> {
        Ok(self.state.lock().voice(voice)?.state)
    }

    fn sample_offset(&self, voice: VoiceId) -> DeviceResult<usize> {
        let mut state = self.state.lock();
        let v = state.voice(voice)?;
        if v.processed < v.queue.len() {
            Ok(v.cursor as usize)
        } else {
            Ok(0)
        }
    }
}

/// Renders the device in real time and publishes the frames.
///
/// Paces itself against wall-clock time so the average rate matches the
/// device rate regardless of timer jitter. The task ends when every
/// receiver has been dropped.
pub fn start_clock(device: Arc<SoftwareDevice>) -> MixerOutput {
    let (tx, rx) = watch::channel(Default::default());

    tokio::spawn(async move {
        let sample_rate = device.sample_rate() as f64;
        let start_time = Instant::now();
        let mut frames_sent: u64 = 0;
        let mut scratch = Vec::new();

        let sleep_time =
            Duration::from_micros(((TARGET_CHUNK_SIZE as f64 / sample_rate) * 1_000_000.0) as u64);

        loop {
            let expected_sent_frames =
                ((start_time.elapsed() + sleep_time).as_secs_f64() * sample_rate) as u64;
            let chunk_size = expected_sent_frames.saturating_sub(frames_sent) as usize;

            scratch.resize(chunk_size * 2, 0.0);
            device.render(&mut scratch);

            let chunk: Vec<Frame> = scratch
                .chunks_exact(2)
                .map(|f| (to_i16(f[0]), to_i16(f[1])))
                .collect();

            if tx.send(chunk).is_err() {
                debug!("All mixer outputs dropped, stopping clock");
                break;
            }
            frames_sent += chunk_size as u64;

            tokio::time::sleep(sleep_time).await;
        }
    });

    rx
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
