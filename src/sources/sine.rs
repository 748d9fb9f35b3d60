use crate::sources::{AudioSource, FillResult, Sample};
use std::time::Duration;

const AMPLITUDE: f64 = 0.5; // 50% amplitude

/// A finite sine tone, generated on demand.
#[derive(Clone, Debug)]
pub struct SineSource {
    frequency: f64,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl SineSource {
    pub fn new(frequency: f64, duration: Duration, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;

        Self {
            frequency,
            sample_rate,
            channels: channels.clamp(1, 2),
            frames,
        }
    }

    fn frame(&self, index: usize) -> Sample {
        // Increment the phase by the frequency divided by the sample rate,
        // wrapped around 1.0 to keep precision on long tones
        let phase = (index as f64 * self.frequency / self.sample_rate as f64) % 1.0;
        sine_wave(phase)
    }
}

impl AudioSource for SineSource {
    fn total_samples(&self) -> Option<usize> {
        Some(self.frames * self.channels as usize)
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
        let total = self.frames * self.channels as usize;
        let written = dest.len().min(total.saturating_sub(offset));

        for (i, sample) in dest[..written].iter_mut().enumerate() {
            *sample = self.frame((offset + i) / self.channels as usize);
        }

        FillResult {
            written,
            is_final: written < dest.len(),
        }
    }
}

// Define a helper function to generate a sine wave sample given a phase
fn sine_wave(phase: f64) -> Sample {
    // Convert the phase to radians and take the sine
    let sample = (phase * std::f64::consts::PI * 2.0).sin();
    // Scale the sample by the amplitude and the maximum value of i16
    let amplitude = i16::MAX as f64 * AMPLITUDE;
    (sample * amplitude) as Sample
}
