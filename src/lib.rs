//! pcm-player library crate
//!
//! Streaming PCM playback on top of a small voice/buffer output device.
//! The command line player is in main.rs.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod event;
pub mod mixer;
pub mod net;
pub mod playback;
pub mod sources;
pub mod stdin;

#[cfg(feature = "cpal")]
pub mod output;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod event_tests;
#[cfg(test)]
mod wav_tests;
