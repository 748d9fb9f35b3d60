//! Eagerly decoded RIFF/WAVE source.
//!
//! The whole payload is converted to 16-bit samples when the source is
//! created, so `fill_samples` is a plain bounded copy.

use crate::error::{AudioError, Result};
use crate::sources::{copy_from, AudioSource, FillResult, Sample};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_EXTENSIBLE: u16 = 0xfffe;

/// Upper bound on what a declared data size may reserve up front
const MAX_RESERVE: u32 = 64 << 20;

/// Fields of the `fmt ` chunk we care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavFormat {
    fn validate(&self) -> Result<()> {
        let tag_ok = matches!(self.format_tag, FORMAT_PCM | FORMAT_EXTENSIBLE);
        let channels_ok = matches!(self.channels, 1 | 2);
        let bits_ok = matches!(self.bits_per_sample, 8 | 16);

        if !(tag_ok && channels_ok && bits_ok) {
            return Err(AudioError::UnsupportedFormat {
                channels: self.channels,
                bits_per_sample: self.bits_per_sample,
                format_tag: self.format_tag,
            });
        }

        if self.sample_rate == 0 {
            return Err(AudioError::MalformedHeader("sample rate is 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct WavSource {
    format: WavFormat,
    samples: Vec<Sample>,
}

impl WavSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let source = Self::from_reader(BufReader::new(file))?;

        debug!(
            "Loaded {}: {} Hz, {} channels, {} bits, {} samples",
            path.display(),
            source.format.sample_rate,
            source.format.channels,
            source.format.bits_per_sample,
            source.samples.len()
        );

        Ok(source)
    }

    /// Parses a complete RIFF/WAVE stream.
    ///
    /// Nothing is allocated for the payload until the format has been
    /// validated.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        expect_tag(&mut reader, b"RIFF")?;
        let _riff_size = reader.read_u32::<LittleEndian>()?;
        expect_tag(&mut reader, b"WAVE")?;

        let mut format = None;

        loop {
            let mut tag = [0u8; 4];
            if let Err(e) = reader.read_exact(&mut tag) {
                return Err(if e.kind() == io::ErrorKind::UnexpectedEof {
                    AudioError::MalformedHeader("missing data chunk".to_string())
                } else {
                    e.into()
                });
            }
            let size = reader.read_u32::<LittleEndian>()?;

            match &tag {
                b"fmt " => {
                    format = Some(read_fmt_chunk(&mut reader, size)?);
                }
                b"data" => {
                    let format = format.ok_or_else(|| {
                        AudioError::MalformedHeader("data chunk before fmt chunk".to_string())
                    })?;
                    let samples = read_payload(&mut reader, size, format.bits_per_sample)?;
                    return Ok(WavSource { format, samples });
                }
                _ => {
                    trace!("Skipping {:?} chunk of {} bytes", String::from_utf8_lossy(&tag), size);
                    skip(&mut reader, padded(size))?;
                }
            }
        }
    }

    /// Wraps already decoded samples.
    pub fn from_samples(channels: u16, sample_rate: u32, samples: Vec<Sample>) -> Result<Self> {
        let format = WavFormat {
            format_tag: FORMAT_PCM,
            channels,
            sample_rate,
            bits_per_sample: 16,
        };
        format.validate()?;

        Ok(WavSource { format, samples })
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl AudioSource for WavSource {
    fn total_samples(&self) -> Option<usize> {
        Some(self.samples.len())
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn bits_per_sample(&self) -> u16 {
        self.format.bits_per_sample
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn fill_samples(&self, dest: &mut [Sample], offset: usize) -> FillResult {
        copy_from(&self.samples, dest, offset)
    }
}

fn expect_tag<R: Read>(reader: &mut R, expected: &[u8; 4]) -> Result<()> {
    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;

    if &tag != expected {
        return Err(AudioError::MalformedHeader(format!(
            "expected {:?}, found {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&tag)
        )));
    }

    Ok(())
}

fn read_fmt_chunk<R: Read>(reader: &mut R, size: u32) -> Result<WavFormat> {
    if size < 16 {
        return Err(AudioError::MalformedHeader(format!(
            "fmt chunk is {size} bytes, at least 16 expected"
        )));
    }

    let format_tag = reader.read_u16::<LittleEndian>()?;
    let channels = reader.read_u16::<LittleEndian>()?;
    let sample_rate = reader.read_u32::<LittleEndian>()?;
    let _byte_rate = reader.read_u32::<LittleEndian>()?;
    let _block_align = reader.read_u16::<LittleEndian>()?;
    let bits_per_sample = reader.read_u16::<LittleEndian>()?;

    // cbSize and any extension bytes
    skip(reader, padded(size) - 16)?;

    let format = WavFormat {
        format_tag,
        channels,
        sample_rate,
        bits_per_sample,
    };
    format.validate()?;

    Ok(format)
}

fn read_payload<R: Read>(reader: &mut R, size: u32, bits_per_sample: u16) -> Result<Vec<Sample>> {
    let mut bytes = Vec::with_capacity(size.min(MAX_RESERVE) as usize);
    (&mut *reader).take(size as u64).read_to_end(&mut bytes)?;

    if bytes.len() < size as usize {
        warn!(
            "Data chunk declares {} bytes but only {} are present",
            size,
            bytes.len()
        );
    }

    let samples = match bits_per_sample {
        8 => bytes.iter().map(|&b| upconvert_u8(b)).collect(),
        _ => {
            let mut samples = vec![0; bytes.len() / 2];
            LittleEndian::read_i16_into(&bytes[..samples.len() * 2], &mut samples);
            samples
        }
    };

    Ok(samples)
}

/// Unsigned 8-bit PCM to signed 16-bit.
pub fn upconvert_u8(byte: u8) -> Sample {
    (byte as i16 - 128) * 256
}

/// Chunks are word aligned, odd sizes carry a pad byte.
fn padded(size: u32) -> u64 {
    size as u64 + (size as u64 & 1)
}

fn skip<R: Read>(reader: &mut R, count: u64) -> Result<()> {
    let skipped = io::copy(&mut (&mut *reader).take(count), &mut io::sink())?;

    if skipped < count {
        return Err(AudioError::MalformedHeader("chunk extends past end of file".to_string()));
    }

    Ok(())
}
