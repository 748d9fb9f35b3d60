//! Streams the software mix to TCP clients as an endless WAV file.
//!
//! Any player that understands WAV over a socket (`ffplay tcp://...`, VLC)
//! can listen in.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use hound::{SampleFormat, WavSpec};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::constants::{BIT_DEPTH, CHANNELS};
use crate::mixer::MixerOutput;

/// Binds `addr` and serves every connection from `source`.
pub async fn start(addr: &str, sample_rate: u32, source: MixerOutput) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Streaming WAV on {}", listener.local_addr()?);

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Accepted connection from {}", addr);
                    tokio::spawn(serve(stream, addr, sample_rate, source.clone()));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }))
}

async fn serve(mut stream: TcpStream, addr: SocketAddr, sample_rate: u32, mut source: MixerOutput) {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BIT_DEPTH,
        sample_format: SampleFormat::Int,
    };

    // The header lets players recognize the stream as a wav file
    let header = spec.into_header_for_infinite_file();
    if let Err(e) = stream.write_all(&header[..]).await {
        warn!("Failed to write wav header to {}: {}", addr, e);
        return;
    }

    while source.changed().await.is_ok() {
        let frames = source.borrow_and_update().clone();
        let wav_data = encode_frames(&frames);

        if let Err(e) = stream.write_all(&wav_data).await {
            info!("Connection from {} closed: {}", addr, e);
            break;
        }
    }
}

/// Interleaves stereo frames as little-endian 16-bit PCM.
pub fn encode_frames(frames: &[(i16, i16)]) -> Vec<u8> {
    let mut wav_data: Vec<u8> = Vec::with_capacity(frames.len() * 4);

    for &(left, right) in frames {
        // Writing into a Vec can't fail
        let _ = WriteBytesExt::write_i16::<LittleEndian>(&mut wav_data, left);
        let _ = WriteBytesExt::write_i16::<LittleEndian>(&mut wav_data, right);
    }

    wav_data
}
