use crate::constants::{BUFFER_SIZE, POLL_INTERVAL, SAMPLE_RATE};
use crate::playback::PlayerSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs::read_to_string;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Stream the mix as WAV over TCP
    #[default]
    Net,

    /// Play through the default sound card
    Cpal,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Samples per streaming chunk
    pub buffer_size: usize,

    pub poll_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub backend: Backend,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            backend: Backend::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    pub listen: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7878".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Dispatcher tick period
    pub tick_ms: u64,

    /// Events a subscriber may fall behind by before it starts skipping
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            capacity: 100,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub player: PlayerConfig,
    pub output: OutputConfig,
    pub net: NetConfig,
    pub events: EventsConfig,
}

impl Config {
    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            buffer_size: self.player.buffer_size,
            poll_interval: Duration::from_millis(self.player.poll_interval_ms),
        }
    }
}

pub fn parse(config: &str) -> Result<Config> {
    let config: Config = toml::from_str(config)?;

    if config.player.buffer_size == 0 {
        anyhow::bail!("player.buffer_size must be positive");
    }

    if config.player.poll_interval_ms == 0 {
        anyhow::bail!("player.poll_interval_ms must be positive");
    }

    Ok(config)
}

/// Loads the config file, falling back to defaults when it doesn't exist.
pub async fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let config = match read_to_string(path).await {
        Ok(config) => config,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    parse(&config).with_context(|| format!("parsing {}", path.display()))
}
