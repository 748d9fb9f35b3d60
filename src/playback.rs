//! Double-buffered streaming playback.
//!
//! An [`AudioPlayer`] owns at most one live session. A session pulls
//! fixed-size chunks from an [`AudioSource`], keeps two of them queued on a
//! device voice, and refills whichever one the device finishes. Transport
//! calls return immediately; the session runs as a tokio task and reports
//! through the player's [`EventQueue`].

use crate::constants::{BUFFER_SIZE, FADE_STEP, POLL_INTERVAL};
use crate::device::{pan_position, BufferFormat, BufferId, OutputDevice, VoiceId, VoiceState};
use crate::error::{AudioError, Result};
use crate::event::{Event, EventQueue, PlayerId};
use crate::sources::{frames_to_duration, AudioSource, Sample};
use byteorder::{ByteOrder, LittleEndian};
use futures::future::{BoxFuture, FutureExt, Shared as SharedFuture};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Resolves once a session task has released its device resources.
type Teardown = SharedFuture<BoxFuture<'static, ()>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    /// Logically stopped, fade-out still audible
    Stopping,
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reached the end of the source and drained
    Finished,

    /// Cancelled by `stop` or a newer `play`
    Stopped,

    /// Cancelled before it touched the device
    Superseded,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayerSettings {
    /// Samples per streaming chunk
    pub buffer_size: usize,

    pub poll_interval: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            poll_interval: POLL_INTERVAL,
        }
    }
}

struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Transport state. Every session carries the generation it was started
/// with and may only touch this state while that generation is current,
/// so a superseded session can't flip `playing` or move the position.
#[derive(Default)]
struct Transport {
    generation: u64,
    playing: bool,
    paused: bool,
    stopping: bool,
    /// Frames
    position: u64,
    /// Frames
    length: u64,
    sample_rate: u32,
}

struct Shared {
    gain: AtomicF32,
    pan: AtomicF32,
    pitch: AtomicF32,
    transport: Mutex<Transport>,
}

impl Shared {
    fn new() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            pitch: AtomicF32::new(1.0),
            transport: Mutex::new(Transport::default()),
        }
    }

    /// Starts a new generation in the playing state.
    fn begin(&self, length: u64, sample_rate: u32) -> u64 {
        let mut t = self.transport.lock();
        t.generation += 1;
        t.playing = true;
        t.paused = false;
        t.stopping = false;
        t.position = 0;
        t.length = length;
        t.sample_rate = sample_rate;
        t.generation
    }

    /// Starts a new generation in the stopped state.
    fn halt(&self, fading: bool) -> u64 {
        let mut t = self.transport.lock();
        t.generation += 1;
        t.playing = false;
        t.paused = false;
        t.stopping = fading;
        t.position = 0;
        t.generation
    }

    fn end(&self, generation: u64) {
        let mut t = self.transport.lock();
        if t.generation == generation {
            t.playing = false;
            t.paused = false;
        }
    }

    fn end_fade(&self, generation: u64) {
        let mut t = self.transport.lock();
        if t.generation == generation {
            t.stopping = false;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.transport.lock().generation == generation
    }

    fn is_paused(&self) -> bool {
        self.transport.lock().paused
    }

    fn set_paused(&self, paused: bool) -> bool {
        let mut t = self.transport.lock();
        if !t.playing || t.paused == paused {
            return false;
        }
        t.paused = paused;
        true
    }

    fn publish_position(&self, generation: u64, frames: u64) {
        let mut t = self.transport.lock();
        if t.generation == generation {
            t.position = frames;
        }
    }

    fn publish_length(&self, generation: u64, frames: u64) {
        let mut t = self.transport.lock();
        if t.generation == generation {
            t.length = frames;
        }
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    teardown: Teardown,
}

pub struct AudioPlayer {
    id: PlayerId,
    device: Arc<dyn OutputDevice>,
    events: EventQueue,
    settings: PlayerSettings,
    shared: Arc<Shared>,
    session: Mutex<Option<SessionHandle>>,
}

impl AudioPlayer {
    /// Creates a player on `device`, posting lifecycle events to `events`.
    ///
    /// The device is probed by creating a throwaway voice.
    pub fn new(
        device: Arc<dyn OutputDevice>,
        events: EventQueue,
        settings: PlayerSettings,
    ) -> Result<Self> {
        let probe = device
            .create_voice()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        device
            .destroy_voice(probe)
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        let id = PlayerId(NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed));
        debug!("Created player {:?} with {:?}", id, settings);

        Ok(AudioPlayer {
            id,
            device,
            events,
            settings: PlayerSettings {
                buffer_size: settings.buffer_size.max(1),
                ..settings
            },
            shared: Arc::new(Shared::new()),
            session: Mutex::new(None),
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Starts streaming `source`, replacing any active session.
    ///
    /// Returns immediately. `loop_start` is a frame index to jump back to
    /// at the end of the source; without it the session finishes.
    pub fn play(&self, source: Arc<dyn AudioSource>, loop_start: Option<usize>) {
        self.start(source, loop_start, None);
    }

    /// Like [`play`](Self::play), but resolves when the session ends.
    pub async fn play_to_end(
        &self,
        source: Arc<dyn AudioSource>,
        loop_start: Option<usize>,
    ) -> Result<SessionOutcome> {
        let (tx, rx) = oneshot::channel();
        self.start(source, loop_start, Some(tx));

        rx.await
            .map_err(|_| AudioError::TaskFailed("session ended without reporting".to_string()))?
    }

    fn start(
        &self,
        source: Arc<dyn AudioSource>,
        loop_start: Option<usize>,
        done: Option<oneshot::Sender<Result<SessionOutcome>>>,
    ) {
        let mut slot = self.session.lock();

        let generation = self
            .shared
            .begin(source.total_frames() as u64, source.sample_rate());

        // The new session waits for this one to release the device
        let previous = slot.take().map(|previous| {
            previous.cancel.cancel();
            previous.teardown
        });

        let cancel = CancellationToken::new();
        let session = Session {
            player: self.id,
            generation,
            device: self.device.clone(),
            events: self.events.clone(),
            shared: self.shared.clone(),
            source,
            loop_start,
            buffer_size: self.settings.buffer_size,
            poll_interval: self.settings.poll_interval,
        };

        let task = tokio::spawn(run_session(session, previous, cancel.clone(), done));

        *slot = Some(SessionHandle {
            cancel,
            teardown: task.map(|_| ()).boxed().shared(),
        });
    }

    pub fn pause(&self) {
        if self.shared.set_paused(true) {
            debug!("Player {:?} paused", self.id);
        }
    }

    pub fn resume(&self) {
        if self.shared.set_paused(false) {
            debug!("Player {:?} resumed", self.id);
        }
    }

    /// Stops playback, optionally fading out over `fade`.
    ///
    /// The player reports itself stopped at once; the fade only affects
    /// what is still audible. Gain returns to 1 once the fade is over.
    pub fn stop(&self, fade: Duration) {
        drop(self.begin_stop(fade));
    }

    /// Like [`stop`](Self::stop), but resolves once the session released the
    /// device and any fade has completed.
    pub async fn stop_and_wait(&self, fade: Duration) {
        self.begin_stop(fade).await;
    }

    fn begin_stop(&self, fade: Duration) -> BoxFuture<'static, ()> {
        let slot = self.session.lock();
        let generation = self.shared.halt(!fade.is_zero());

        // The handle stays in the slot so a later `play` still waits for
        // this session's teardown
        let session = slot
            .as_ref()
            .map(|s| (s.cancel.clone(), s.teardown.clone()));

        if fade.is_zero() {
            debug!("Player {:?} stopped", self.id);
            return match session {
                Some((cancel, teardown)) => {
                    cancel.cancel();
                    teardown.boxed()
                }
                None => futures::future::ready(()).boxed(),
            };
        }

        debug!("Player {:?} fading out over {:?}", self.id, fade);
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let completed = fade_out(&shared, generation, fade).await;

            if completed {
                if let Some((cancel, teardown)) = session {
                    cancel.cancel();
                    teardown.await;
                }
            }

            shared.gain.store(1.0);
            shared.end_fade(generation);
        });

        task.map(|_| ()).boxed()
    }

    /// Plays a fully known source once on its own voice, without
    /// streaming. Runs alongside the main session and other one-shots.
    pub fn play_one_shot(
        &self,
        source: Arc<dyn AudioSource>,
        gain: f32,
        pitch: f32,
        pan: f32,
    ) -> Result<()> {
        self.start_one_shot(source, gain, pitch, pan).map(drop)
    }

    /// Like [`play_one_shot`](Self::play_one_shot), but resolves once the
    /// device has played the whole buffer.
    pub async fn play_one_shot_to_end(
        &self,
        source: Arc<dyn AudioSource>,
        gain: f32,
        pitch: f32,
        pan: f32,
    ) -> Result<()> {
        self.start_one_shot(source, gain, pitch, pan)?
            .await
            .map_err(|e| AudioError::TaskFailed(e.to_string()))?
    }

    fn start_one_shot(
        &self,
        source: Arc<dyn AudioSource>,
        gain: f32,
        pitch: f32,
        pan: f32,
    ) -> Result<JoinHandle<Result<()>>> {
        let total = source
            .total_samples()
            .ok_or(AudioError::IndeterminateLength)?;
        let format = buffer_format(source.as_ref())?;

        let mut samples = vec![0; total];
        let fill = source.fill_samples(&mut samples, 0);

        if let Some(error) = source.error() {
            return Err(AudioError::SourceFailed(error));
        }
        // The whole source has to be there before the device is touched
        if fill.written < total {
            return Err(AudioError::IndeterminateLength);
        }

        let resources = Resources::allocate(self.device.clone(), 1)?;
        let voice = resources.voice;
        let device = &self.device;

        device.buffer_data(
            resources.buffers[0],
            format,
            &encode(&samples),
            source.sample_rate(),
        )?;
        device.set_gain(voice, gain.clamp(0.0, 1.0))?;
        device.set_pitch(voice, pitch)?;
        device.set_position(voice, pan_position(pan))?;
        device.queue_buffers(voice, &resources.buffers)?;
        device.play(voice)?;

        trace!("One-shot of {} samples on {:?}", samples.len(), voice);

        let poll_interval = self.settings.poll_interval;
        Ok(tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;

                let device = &resources.device;
                if device.buffers_processed(voice)? >= 1
                    || device.voice_state(voice)? == VoiceState::Stopped
                {
                    break;
                }
            }

            drop(resources);
            Ok::<(), AudioError>(())
        }))
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.clamp(0.0, 1.0));
    }

    pub fn pan(&self) -> f32 {
        self.shared.pan.load()
    }

    pub fn set_pan(&self, pan: f32) {
        self.shared.pan.store(pan.clamp(-1.0, 1.0));
    }

    pub fn pitch(&self) -> f32 {
        self.shared.pitch.load()
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.shared.pitch.store(pitch);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.transport.lock().playing
    }

    pub fn is_pausing(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn state(&self) -> PlayerState {
        let t = self.shared.transport.lock();
        match (t.playing, t.paused, t.stopping) {
            (true, true, _) => PlayerState::Paused,
            (true, false, _) => PlayerState::Playing,
            (false, _, true) => PlayerState::Stopping,
            (false, _, false) => PlayerState::Idle,
        }
    }

    /// Playback position in frames
    pub fn time_in_samples(&self) -> u64 {
        self.shared.transport.lock().position
    }

    pub fn time(&self) -> Duration {
        let t = self.shared.transport.lock();
        frames_to_duration(t.position, t.sample_rate)
    }

    /// Source length in frames, 0 while unknown
    pub fn length_in_samples(&self) -> u64 {
        self.shared.transport.lock().length
    }

    pub fn length(&self) -> Duration {
        let t = self.shared.transport.lock();
        frames_to_duration(t.length, t.sample_rate)
    }

    pub fn buffer_size(&self) -> usize {
        self.settings.buffer_size
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.cancel.cancel();
        }
    }
}

/// Ramps gain linearly to zero. Returns false if a newer `play` took over.
async fn fade_out(shared: &Shared, generation: u64, fade: Duration) -> bool {
    let start_gain = shared.gain.load();
    let started = Instant::now();

    loop {
        if !shared.is_current(generation) {
            return false;
        }

        let progress = started.elapsed().as_secs_f32() / fade.as_secs_f32();
        if progress >= 1.0 {
            shared.gain.store(0.0);
            return true;
        }

        shared.gain.store(start_gain * (1.0 - progress));
        tokio::time::sleep(FADE_STEP).await;
    }
}

async fn run_session(
    session: Session,
    previous: Option<Teardown>,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<Result<SessionOutcome>>>,
) {
    if let Some(previous) = previous {
        previous.await;
    }

    let result = if cancel.is_cancelled() {
        Ok(SessionOutcome::Superseded)
    } else {
        session.run(&cancel).await
    };

    match &result {
        Ok(outcome) => debug!("Player {:?} session ended: {:?}", session.player, outcome),
        Err(e) => {
            error!("Player {:?} session failed: {}", session.player, e);
            session.shared.end(session.generation);
            session.events.post(Event::SessionFailed {
                player: session.player,
                error: e.to_string(),
            });
        }
    }

    if let Some(done) = done {
        let _ = done.send(result);
    }
}

/// Voice and buffers owned by one session or one-shot, released on drop.
struct Resources {
    device: Arc<dyn OutputDevice>,
    voice: VoiceId,
    buffers: Vec<BufferId>,
}

impl Resources {
    fn allocate(device: Arc<dyn OutputDevice>, buffer_count: usize) -> Result<Self> {
        let voice = device.create_voice()?;
        let mut resources = Resources {
            device,
            voice,
            buffers: Vec::with_capacity(buffer_count),
        };

        for _ in 0..buffer_count {
            let buffer = resources.device.create_buffer()?;
            resources.buffers.push(buffer);
        }

        Ok(resources)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        let _ = self.device.stop(self.voice);

        // Destroying the voice unqueues its buffers
        if let Err(e) = self.device.destroy_voice(self.voice) {
            warn!("Failed to destroy voice {:?}: {}", self.voice, e);
        }
        for buffer in &self.buffers {
            if let Err(e) = self.device.destroy_buffer(*buffer) {
                warn!("Failed to destroy buffer {:?}: {}", buffer, e);
            }
        }
    }
}

/// Everything a session task needs, moved into the task.
struct Session {
    player: PlayerId,
    generation: u64,
    device: Arc<dyn OutputDevice>,
    events: EventQueue,
    shared: Arc<Shared>,
    source: Arc<dyn AudioSource>,
    /// Frames
    loop_start: Option<usize>,
    buffer_size: usize,
    poll_interval: Duration,
}

/// Refill bookkeeping for one session.
struct Stream {
    voice: VoiceId,
    format: BufferFormat,
    channels: usize,
    /// Buffers not queued on the voice
    idle: Vec<BufferId>,
    /// Interleaved sample index each queued buffer starts at
    starts: HashMap<BufferId, usize>,
    /// Next interleaved sample to pull from the source
    cursor: usize,
    /// Set after wrapping to the loop point, cleared by any progress
    wrapped: bool,
    scratch: Vec<Sample>,
}

impl Session {
    async fn run(&self, cancel: &CancellationToken) -> Result<SessionOutcome> {
        let format = buffer_format(self.source.as_ref())?;
        let resources = Resources::allocate(self.device.clone(), 2)?;
        let voice = resources.voice;

        let channels = self.source.channels() as usize;
        // Chunks hold whole frames
        let chunk_size = (self.buffer_size / channels).max(1) * channels;

        let mut stream = Stream {
            voice,
            format,
            channels,
            idle: resources.buffers.iter().rev().copied().collect(),
            starts: HashMap::new(),
            cursor: 0,
            wrapped: false,
            scratch: vec![0; chunk_size],
        };

        debug!(
            "Player {:?} starting session on {:?}, {} frames",
            self.player,
            voice,
            self.source.total_frames()
        );

        // Queue both chunks before starting so the device doesn't underrun
        let mut ended = self.refill(&mut stream)?;
        self.apply_parameters(voice)?;
        self.device.play(voice)?;
        self.events.post(Event::StartPlaying(self.player));

        while !cancel.is_cancelled() {
            self.apply_parameters(voice)?;
            self.track_position(&stream)?;

            tokio::time::sleep(self.poll_interval).await;

            if self.shared.is_paused() {
                self.device.pause(voice)?;
                while self.shared.is_paused() && !cancel.is_cancelled() {
                    tokio::time::sleep(self.poll_interval).await;
                }
                if cancel.is_cancelled() {
                    break;
                }
                self.device.play(voice)?;
            }

            let processed = self.device.buffers_processed(voice)?;
            let queued = self.device.buffers_queued(voice)?;

            if ended {
                // Drain: let everything queued play out
                if processed >= queued {
                    // Stopped with a fade while draining
                    if !self.shared.is_current(self.generation) {
                        break;
                    }

                    self.track_position(&stream)?;
                    self.shared.end(self.generation);
                    self.events.post(Event::FinishPlaying(self.player));
                    return Ok(SessionOutcome::Finished);
                }
                continue;
            }

            if processed > 0 {
                for buffer in self.device.unqueue_buffers(voice, processed)? {
                    stream.starts.remove(&buffer);
                    stream.idle.push(buffer);
                }
            }

            if !stream.idle.is_empty() {
                ended = self.refill(&mut stream)?;
            }

            // Starved voices stop on their own, start them again
            if self.device.voice_state(voice)? == VoiceState::Stopped
                && self.device.buffers_processed(voice)? < self.device.buffers_queued(voice)?
            {
                warn!("Player {:?} underrun, restarting {:?}", self.player, voice);
                self.device.play(voice)?;
            }
        }

        self.events.post(Event::StopPlaying(self.player));
        Ok(SessionOutcome::Stopped)
    }

    /// Fills and queues idle buffers from the stream cursor. Returns true
    /// once the last chunk of a non-looping source has been queued.
    fn refill(&self, stream: &mut Stream) -> Result<bool> {
        while let Some(&buffer) = stream.idle.last() {
            let fill = self
                .source
                .fill_samples(&mut stream.scratch, stream.cursor);

            if fill.written > 0 {
                self.device.buffer_data(
                    buffer,
                    stream.format,
                    &encode(&stream.scratch[..fill.written]),
                    self.source.sample_rate(),
                )?;
                self.device.queue_buffers(stream.voice, &[buffer])?;

                stream.idle.pop();
                stream.starts.insert(buffer, stream.cursor);
                stream.cursor += fill.written;
                stream.wrapped = false;
            }

            if let Some(error) = self.source.error() {
                return Err(AudioError::SourceFailed(error));
            }

            if !fill.is_final {
                if fill.written == 0 {
                    // The source is still loading, try again next tick
                    break;
                }
                continue;
            }

            let Some(loop_start) = self.loop_start else {
                return Ok(true);
            };

            if stream.wrapped {
                warn!(
                    "Player {:?} loop point {} is past the end of the source",
                    self.player, loop_start
                );
                return Ok(true);
            }

            stream.cursor = loop_start * stream.channels;
            stream.wrapped = true;
            self.shared
                .publish_position(self.generation, loop_start as u64);
            self.events.post(Event::Loop(self.player));
            trace!("Player {:?} looped to frame {}", self.player, loop_start);
        }

        Ok(false)
    }

    fn apply_parameters(&self, voice: VoiceId) -> Result<()> {
        self.device.set_gain(voice, self.shared.gain.load())?;
        self.device.set_pitch(voice, self.shared.pitch.load())?;
        self.device
            .set_position(voice, pan_position(self.shared.pan.load()))?;
        Ok(())
    }

    /// Position = start of the playing buffer + the device's offset into it.
    fn track_position(&self, stream: &Stream) -> Result<()> {
        let current = self.device.current_buffer(stream.voice)?;
        let start = current.and_then(|buffer| stream.starts.get(&buffer));

        if let Some(&start) = start {
            let offset = self.device.sample_offset(stream.voice)?;
            let frames = start / stream.channels + offset;
            self.shared.publish_position(self.generation, frames as u64);
        }

        self.shared
            .publish_length(self.generation, self.source.total_frames() as u64);
        Ok(())
    }
}

fn buffer_format(source: &dyn AudioSource) -> Result<BufferFormat> {
    BufferFormat::new(source.channels(), 16).ok_or(AudioError::UnsupportedFormat {
        channels: source.channels(),
        bits_per_sample: source.bits_per_sample(),
        format_tag: 0,
    })
}

fn encode(samples: &[Sample]) -> Vec<u8> {
    let mut bytes = vec![0; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}
