//! Progressively decoded source backed by symphonia.
//!
//! The stream is probed synchronously, then a blocking task decodes it
//! packet by packet into a shared [`DecodeBuffer`]. Playback can start as
//! soon as the first packets are published.

use crate::buffer::DecodeBuffer;
use crate::error::{AudioError, Result};
use crate::sources::{AudioSource, FillResult, Sample};
use std::fs::File;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct StreamingSource {
    buffer: Arc<DecodeBuffer>,
    channels: u16,
    sample_rate: u32,
    /// Interleaved length declared by the container, if any
    declared_samples: Option<usize>,
    cancel: CancellationToken,
    decode_task: Option<JoinHandle<()>>,
}

impl StreamingSource {
    /// Opens a file, using its extension as a format hint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        Self::start(Box::new(file), hint)
    }

    /// Decodes an in-memory stream. `extension` is an optional format hint
    /// such as `"ogg"`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self> {
        Self::from_media_source(Box::new(Cursor::new(bytes)), extension)
    }

    /// Decodes any symphonia media source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_media_source(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<Self> {
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        Self::start(source, hint)
    }

    fn start(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::TaskFailed(format!("no tokio runtime: {e}")))?;

        let mss = MediaSourceStream::new(source, Default::default());

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();
        let decoder_opts: DecoderOptions = Default::default();

        let probed =
            symphonia::default::get_probe().format(&hint, mss, &format_opts, &metadata_opts)?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| AudioError::MalformedHeader("no audio track in stream".to_string()))?;

        let params = &track.codec_params;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let sample_rate = params.sample_rate.unwrap_or(0);

        if !matches!(channels, 1 | 2) {
            return Err(AudioError::UnsupportedFormat {
                channels,
                bits_per_sample: 16,
                format_tag: 0,
            });
        }
        if sample_rate == 0 {
            return Err(AudioError::MalformedHeader("stream declares no sample rate".to_string()));
        }

        let declared_samples = params
            .n_frames
            .map(|frames| frames as usize * channels as usize);

        let decoder = symphonia::default::get_codecs().make(params, &decoder_opts)?;
        let track_id = track.id;

        let buffer = Arc::new(DecodeBuffer::with_capacity(declared_samples.unwrap_or(0)));
        let cancel = CancellationToken::new();

        debug!(
            "Starting progressive decode: {} Hz, {} channels, {:?} samples declared",
            sample_rate, channels, declared_samples
        );

        let decode_task = {
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            runtime.spawn_blocking(move || {
                match decode_stream(format, decoder, track_id, &buffer, &cancel) {
                    Ok(()) => buffer.finish(),
                    Err(e) => {
                        error!("Error while decoding stream: {}", e);
                        buffer.fail(e.to_string());
                    }
                }
                debug!("Decode finished with {} samples", buffer.loaded());
            })
        };

        Ok(StreamingSource {
            buffer,
            channels,
            sample_rate,
            declared_samples,
            cancel,
            decode_task: Some(decode_task),
        })
    }

    pub fn is_decode_finished(&self) -> bool {
        self.buffer.is_finished()
    }

    /// Number of samples decoded so far
    pub fn loaded_samples(&self) -> usize {
        self.buffer.loaded()
    }

    /// Length declared by the container, which may differ from what
    /// actually decodes.
    pub fn declared_samples(&self) -> Option<usize> {
        self.declared_samples
    }

    /// Waits for the background decode to complete. Fails if decoding
    /// stopped on an error.
    pub async fn wait_decoded(&mut self) -> Result<()> {
        if let Some(task) = self.decode_task.take() {
            task.await
                .map_err(|e| AudioError::TaskFailed(e.to_string()))?;
        }

        match self.buffer.error() {
            Some(error) => Err(AudioError::SourceFailed(error)),
            None => Ok(()),
        }
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl AudioSource for StreamingSource {
    /// Unknown until decoding finishes; the declared length is only a hint.
    fn total_samples(&self) -> Option<usize> {
        self.buffer.is_finished().then(|| self.buffer.loaded())
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn bits_per_sample(&self) -> u16 {
        16
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fill_samples(&self, dest: &mut [Sample], offset: usize) -> FillResult {
        self.buffer.fill(dest, offset)
    }

    fn error(&self) -> Option<String> {
        self.buffer.error()
    }
}

fn decode_stream(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn Decoder>,
    track_id: u32,
    buffer: &DecodeBuffer,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut sample_buf = None;

    while !cancel.is_cancelled() {
        // Get the next packet from the format reader.
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Symphonia reports the end of the stream as UnexpectedEof
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // If the packet does not belong to the selected track, skip it.
        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        // Create the sample buffer on the first packet, and grow it if a
        // later packet is larger
        let spec = *audio_buf.spec();
        let needed = audio_buf.capacity() * spec.channels.count();
        if sample_buf
            .as_ref()
            .map_or(true, |buf: &SampleBuffer<f32>| buf.capacity() < needed)
        {
            sample_buf = Some(SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
        }

        if let Some(buf) = &mut sample_buf {
            buf.copy_interleaved_ref(audio_buf);
            buffer.push_samples(buf.samples().iter().map(|&s| to_pcm16(s)));
        }
    }

    debug!("Decode cancelled after {} samples", buffer.loaded());
    Ok(())
}

/// Float sample in [-1, 1] to 16-bit PCM.
pub fn to_pcm16(sample: f32) -> Sample {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as Sample
}
