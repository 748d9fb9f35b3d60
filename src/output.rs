//! Sound card output through cpal.

use crate::error::{AudioError, Result};
use crate::mixer::SoftwareDevice;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

/// Keeps the cpal stream alive. cpal streams are not `Send`, so this must
/// stay on the thread that opened it.
pub struct CpalOutput {
    _stream: cpal::Stream,
    pub sample_rate: u32,
}

/// Opens the default output device and renders `device` from its callback.
///
/// The software device must run at the sound card's rate; use
/// [`default_sample_rate`] to create it.
pub fn open(device: Arc<SoftwareDevice>) -> Result<CpalOutput> {
    let host = cpal::default_host();
    let output = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no output device available".to_string()))?;

    let supported = output
        .default_output_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    if sample_rate != device.sample_rate() {
        return Err(AudioError::DeviceUnavailable(format!(
            "sound card runs at {} Hz, mixer at {} Hz",
            sample_rate,
            device.sample_rate()
        )));
    }

    let mut stereo = Vec::new();
    let stream = output
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                stereo.resize(frames * 2, 0.0);
                device.render(&mut stereo);

                for (out, frame) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    match out.len() {
                        1 => out[0] = (frame[0] + frame[1]) * 0.5,
                        _ => {
                            out[0] = frame[0];
                            out[1] = frame[1];
                            // Extra channels stay silent
                            for sample in &mut out[2..] {
                                *sample = 0.0;
                            }
                        }
                    }
                }
            },
            |e| error!("Output stream error: {}", e),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    info!("Playing through the default sound card at {} Hz", sample_rate);

    Ok(CpalOutput {
        _stream: stream,
        sample_rate,
    })
}

/// Sample rate of the default output device.
pub fn default_sample_rate() -> Result<u32> {
    let output = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no output device available".to_string()))?;

    output
        .default_output_config()
        .map(|config| config.sample_rate().0)
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}
