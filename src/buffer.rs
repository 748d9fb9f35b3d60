//! Growable sample buffer shared between a decoder and the playback engine.
//!
//! One writer appends decoded samples, any number of readers copy out of
//! the already published prefix. `loaded` is only advanced after the
//! samples it covers are written, so readers never observe unwritten data.

use crate::sources::{FillResult, Sample};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct DecodeBuffer {
    samples: RwLock<Vec<Sample>>,
    /// Number of samples readers may access
    loaded: AtomicUsize,
    finished: AtomicBool,
    /// Why the writer gave up, set before `finished`
    error: Mutex<Option<String>>,
}

impl DecodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer with room for `capacity` samples, usually the
    /// length the container declares.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(Vec::with_capacity(capacity)),
            ..Self::default()
        }
    }

    /// Appends samples and publishes them. Must only be called by the single writer.
    pub fn push_samples<I: IntoIterator<Item = Sample>>(&self, samples: I) {
        let len = {
            let mut buffer = self.samples.write();
            buffer.extend(samples);
            buffer.len()
        };

        self.loaded.store(len, Ordering::Release);
    }

    /// Marks the stream as complete. No samples may be pushed afterwards.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Records a fatal decode error and finishes the stream.
    pub fn fail(&self, error: String) {
        *self.error.lock() = Some(error);
        self.finish();
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Number of published samples
    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// Copies published samples starting at `offset`.
    ///
    /// A short copy is only final once the writer has finished; until then
    /// the caller should come back for the rest.
    pub fn fill(&self, dest: &mut [Sample], offset: usize) -> FillResult {
        // Read `finished` before `loaded`: if the writer finished, every
        // sample it pushed is visible through `loaded` as well
        let finished = self.is_finished();
        let loaded = self.loaded();

        let written = dest.len().min(loaded.saturating_sub(offset));

        if written > 0 {
            let buffer = self.samples.read();
            dest[..written].copy_from_slice(&buffer[offset..offset + written]);
        }

        FillResult {
            written,
            is_final: finished && written < dest.len(),
        }
    }
}
