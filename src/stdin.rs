//! Keyboard transport control for the command line player.

use crate::playback::AudioPlayer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const GAIN_STEP: f32 = 0.1;
const PAN_STEP: f32 = 0.25;
const FADE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    FadeOut,
    Gain(f32),
    Pan(f32),
    Quit,
}

pub fn parse_key(key: u8) -> Option<Command> {
    match key {
        b'p' => Some(Command::Pause),
        b'r' => Some(Command::Resume),
        b's' => Some(Command::Stop),
        b'f' => Some(Command::FadeOut),
        b'+' => Some(Command::Gain(GAIN_STEP)),
        b'-' => Some(Command::Gain(-GAIN_STEP)),
        b'<' => Some(Command::Pan(-PAN_STEP)),
        b'>' => Some(Command::Pan(PAN_STEP)),
        b'q' => Some(Command::Quit),
        _ => None,
    }
}

/// Applies `command` to `player`. Returns false once the user asked to quit.
pub fn apply(player: &AudioPlayer, command: Command) -> bool {
    match command {
        Command::Pause => player.pause(),
        Command::Resume => player.resume(),
        Command::Stop => player.stop(Duration::ZERO),
        Command::FadeOut => player.stop(FADE),
        Command::Gain(step) => {
            player.set_gain(player.gain() + step);
            info!("Gain {:.2}", player.gain());
        }
        Command::Pan(step) => {
            player.set_pan(player.pan() + step);
            info!("Pan {:.2}", player.pan());
        }
        Command::Quit => return false,
    }

    true
}

/// Reads keys from stdin, cancelling `quit` on `q`.
pub fn start(player: Arc<AudioPlayer>, quit: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];

        loop {
            let n = match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            for command in buf[..n].iter().filter_map(|&b| parse_key(b)) {
                debug!("Key command: {:?}", command);
                if !apply(&player, command) {
                    quit.cancel();
                    return;
                }
            }
        }

        // Keep playing without a terminal, the user can still ctrl-c
        debug!("Stdin closed");
    })
}
