#[macro_use]
extern crate log;

use anyhow::{Context, Result};
use clap::Parser;
use pcm_player::config::{self, Backend, Config};
use pcm_player::event::{Dispatcher, Event};
use pcm_player::mixer::{self, SoftwareDevice};
use pcm_player::playback::AudioPlayer;
use pcm_player::sources::sine::SineSource;
use pcm_player::sources::symphonia::StreamingSource;
use pcm_player::sources::wav::WavSource;
use pcm_player::sources::AudioSource;
use pcm_player::{net, stdin};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TONE_DURATION: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(version, about = "Streams an audio file through the playback engine")]
struct Args {
    /// Audio file to play (WAV is loaded up front, anything else is decoded
    /// while playing)
    #[arg(required_unless_present = "tone")]
    file: Option<PathBuf>,

    /// Loop back to this frame at the end instead of finishing
    #[arg(long)]
    loop_start: Option<usize>,

    #[arg(long, default_value_t = 1.0)]
    gain: f32,

    /// -1 is hard left, 1 hard right
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pan: f32,

    #[arg(long, default_value_t = 1.0)]
    pitch: f32,

    #[arg(long, default_value = "Config.toml")]
    config: PathBuf,

    /// Play a sine tone of this frequency instead of a file
    #[arg(long)]
    tone: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let config = config::load(&args.config).await?;

    #[cfg(feature = "cpal")]
    let sample_rate = match config.output.backend {
        Backend::Cpal => pcm_player::output::default_sample_rate()?,
        Backend::Net => config.output.sample_rate,
    };
    #[cfg(not(feature = "cpal"))]
    let sample_rate = config.output.sample_rate;

    let device = Arc::new(SoftwareDevice::new(sample_rate)?);

    let _sinks = start_sink(&config, device.clone()).await?;

    let dispatcher = Dispatcher::new(config.events.capacity);
    let mut events = dispatcher.subscribe();
    let player = Arc::new(AudioPlayer::new(
        device,
        dispatcher.queue(),
        config.player_settings(),
    )?);
    let _dispatch = dispatcher.run(Duration::from_millis(config.events.tick_ms.max(1)));

    let source = open_source(&args, sample_rate)?;
    info!(
        "Playing {} frames at {} Hz, {} channel(s)",
        source.total_frames(),
        source.sample_rate(),
        source.channels()
    );

    player.set_gain(args.gain);
    player.set_pan(args.pan);
    player.set_pitch(args.pitch);
    player.play(source, args.loop_start);

    let quit = CancellationToken::new();
    let _stdin = stdin::start(player.clone(), quit.clone());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::FinishPlaying(_)) | Some(Event::StopPlaying(_)) => {
                    info!("Playback ended after {:?}", player.time());
                    break;
                }
                Some(Event::SessionFailed { error, .. }) => {
                    anyhow::bail!("playback failed: {error}");
                }
                Some(event) => info!("{:?} at {:?}", event, player.time()),
                None => break,
            },
            _ = quit.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    player.stop_and_wait(Duration::ZERO).await;

    Ok(())
}

/// Keeps the running sink alive for the lifetime of main.
#[derive(Default)]
#[allow(dead_code)]
struct Sinks {
    net: Option<tokio::task::JoinHandle<()>>,
    #[cfg(feature = "cpal")]
    cpal: Option<pcm_player::output::CpalOutput>,
}

async fn start_sink(config: &Config, device: Arc<SoftwareDevice>) -> Result<Sinks> {
    let mut sinks = Sinks::default();

    match config.output.backend {
        Backend::Net => {
            let output = mixer::start_clock(device.clone());
            let sample_rate = device.sample_rate();
            sinks.net = Some(net::start(&config.net.listen, sample_rate, output).await?);
        }

        #[cfg(feature = "cpal")]
        Backend::Cpal => sinks.cpal = Some(pcm_player::output::open(device)?),

        #[cfg(not(feature = "cpal"))]
        Backend::Cpal => anyhow::bail!("built without the cpal feature, use the net backend"),
    }

    Ok(sinks)
}

fn open_source(args: &Args, sample_rate: u32) -> Result<Arc<dyn AudioSource>> {
    if let Some(frequency) = args.tone {
        return Ok(Arc::new(SineSource::new(
            frequency,
            TONE_DURATION,
            sample_rate,
            2,
        )));
    }

    let path = args.file.as_deref().context("no file given")?;

    if is_wav(path) {
        let source = WavSource::open(path).with_context(|| format!("loading {}", path.display()))?;
        Ok(Arc::new(source))
    } else {
        let source =
            StreamingSource::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Arc::new(source))
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}
