//! Audio primitives
//!
//! Frames of little-endian 16-bit PCM plus the sink interface the
//! orchestrator plays responses through. Device plumbing lives outside the
//! core; sources feed frames in over a channel, sinks take byte chunks out.

pub mod wav;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Capture rate for microphone PCM (mono)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Playback rate for the streaming backend's response audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Immutable slice of LE 16-bit mono PCM with its capture timestamp.
/// Not retained beyond the current utterance.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub captured_at: DateTime<Utc>,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, sample_rate: u32, captured_at: DateTime<Utc>) -> Self {
        Self {
            data,
            sample_rate,
            captured_at,
        }
    }

    /// Duration derived from byte count (2 bytes per sample, mono)
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.data.len() / 2) as f64 / self.sample_rate as f64 * 1000.0
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Decode to i16 samples
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

/// Compute RMS energy of PCM samples (used by the local silence timer)
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| (s as f32).powi(2)).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Outbound audio. Owned exclusively by the orchestrator; backends write
/// through it.
pub trait AudioSink: Send + Sync {
    /// Queue a PCM/encoded chunk at the given sample rate
    fn play(&self, chunk: &[u8], sample_rate: u32) -> Result<()>;

    /// Signal end of the current chunk stream and drop anything queued
    fn flush(&self) -> Result<()>;
}

/// Sink that discards audio (headless runs)
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, _chunk: &[u8], _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that records everything written to it, for tests
#[derive(Clone, Default)]
pub struct MemorySink {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    flushes: Arc<Mutex<u32>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.lock().unwrap().iter().map(|c| c.len()).sum()
    }

    pub fn flush_count(&self) -> u32 {
        *self.flushes.lock().unwrap()
    }
}

impl AudioSink for MemorySink {
    fn play(&self, chunk: &[u8], _sample_rate: u32) -> Result<()> {
        self.chunks.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }
}
