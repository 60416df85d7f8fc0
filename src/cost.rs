//! Cost ledger
//!
//! Append-only record of per-stage API costs with rolling daily/monthly
//! aggregates and budget checks. The price table is a constant of this
//! module, not user-configurable at runtime.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::types::{Mode, Stage};

/// Streaming audio input, dollars per minute
pub const REALTIME_AUDIO_IN_PER_MIN: f64 = 0.06;
/// Streaming audio output, dollars per minute
pub const REALTIME_AUDIO_OUT_PER_MIN: f64 = 0.24;
/// Streaming text input, dollars per million tokens
pub const REALTIME_TEXT_IN_PER_MTOK: f64 = 5.0;
/// Streaming text output, dollars per million tokens
pub const REALTIME_TEXT_OUT_PER_MTOK: f64 = 20.0;
/// Transcription, dollars per minute of audio
pub const TRANSCRIBE_PER_MIN: f64 = 0.006;
/// Reasoning input, dollars per million tokens
pub const REASON_IN_PER_MTOK: f64 = 0.15;
/// Reasoning output, dollars per million tokens
pub const REASON_OUT_PER_MTOK: f64 = 0.60;
/// Synthesis, dollars per 1000 characters
pub const SYNTHESIZE_PER_1K_CHARS: f64 = 0.015;

/// Entries older than this are dropped by `trim`
pub const RETENTION_DAYS: i64 = 30;

/// Billable units for one stage of one interaction
#[derive(Debug, Clone)]
pub enum StageUnits {
    Realtime {
        audio_in_secs: f64,
        audio_out_secs: f64,
        text_in_tokens: u64,
        text_out_tokens: u64,
    },
    Transcribe {
        audio_secs: f64,
    },
    Reason {
        input_tokens: u64,
        output_tokens: u64,
    },
    Synthesize {
        characters: u64,
    },
}

impl StageUnits {
    pub fn stage(&self) -> Stage {
        match self {
            StageUnits::Realtime { .. } => Stage::Realtime,
            StageUnits::Transcribe { .. } => Stage::Transcribe,
            StageUnits::Reason { .. } => Stage::Reason,
            StageUnits::Synthesize { .. } => Stage::Synthesize,
        }
    }

    /// Dollar amount per the fixed price table
    pub fn amount(&self) -> f64 {
        match self {
            StageUnits::Realtime {
                audio_in_secs,
                audio_out_secs,
                text_in_tokens,
                text_out_tokens,
            } => {
                audio_in_secs / 60.0 * REALTIME_AUDIO_IN_PER_MIN
                    + audio_out_secs / 60.0 * REALTIME_AUDIO_OUT_PER_MIN
                    + *text_in_tokens as f64 / 1_000_000.0 * REALTIME_TEXT_IN_PER_MTOK
                    + *text_out_tokens as f64 / 1_000_000.0 * REALTIME_TEXT_OUT_PER_MTOK
            }
            StageUnits::Transcribe { audio_secs } => audio_secs / 60.0 * TRANSCRIBE_PER_MIN,
            StageUnits::Reason {
                input_tokens,
                output_tokens,
            } => {
                *input_tokens as f64 / 1_000_000.0 * REASON_IN_PER_MTOK
                    + *output_tokens as f64 / 1_000_000.0 * REASON_OUT_PER_MTOK
            }
            StageUnits::Synthesize { characters } => {
                *characters as f64 / 1000.0 * SYNTHESIZE_PER_1K_CHARS
            }
        }
    }

    fn tokens(&self) -> Option<u64> {
        match self {
            StageUnits::Realtime {
                text_in_tokens,
                text_out_tokens,
                ..
            } => Some(text_in_tokens + text_out_tokens),
            StageUnits::Reason {
                input_tokens,
                output_tokens,
            } => Some(input_tokens + output_tokens),
            _ => None,
        }
    }

    fn audio_seconds(&self) -> Option<f64> {
        match self {
            StageUnits::Realtime {
                audio_in_secs,
                audio_out_secs,
                ..
            } => Some(audio_in_secs + audio_out_secs),
            StageUnits::Transcribe { audio_secs } => Some(*audio_secs),
            _ => None,
        }
    }
}

/// One appended cost record. Never mutated or deleted except by `trim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
    pub stage: Stage,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_seconds: Option<f64>,
}

/// Aggregate view over the ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    pub total: f64,
    pub today: f64,
    pub month: f64,
    pub count: usize,
    pub avg: f64,
    pub daily_remaining: f64,
}

/// Append-only cost ledger with rolling-window aggregates
#[derive(Clone)]
pub struct CostLedger {
    entries: Arc<Mutex<Vec<CostEntry>>>,
    daily_budget: f64,
    monthly_budget: f64,
}

impl CostLedger {
    pub fn new(daily_budget: f64, monthly_budget: f64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            daily_budget,
            monthly_budget,
        }
    }

    /// Rebuild from a snapshot; entries are replayed in timestamp order so
    /// the total stays monotone.
    pub fn from_entries(daily_budget: f64, monthly_budget: f64, mut entries: Vec<CostEntry>) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        Self {
            entries: Arc::new(Mutex::new(entries)),
            daily_budget,
            monthly_budget,
        }
    }

    /// Record one stage's usage; returns the computed cost in dollars
    pub fn record(&self, mode: Mode, units: StageUnits, now: DateTime<Utc>) -> f64 {
        let amount = units.amount();
        let entry = CostEntry {
            timestamp: now,
            mode,
            stage: units.stage(),
            amount,
            tokens: units.tokens(),
            audio_seconds: units.audio_seconds(),
        };
        debug!(stage = %entry.stage, amount = %format!("{:.6}", amount), "cost recorded");
        self.entries.lock().unwrap().push(entry);
        amount
    }

    fn sum_since(entries: &[CostEntry], cutoff: DateTime<Utc>) -> f64 {
        entries
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .map(|e| e.amount)
            .sum()
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> CostMetrics {
        let entries = self.entries.lock().unwrap();
        let total: f64 = entries.iter().map(|e| e.amount).sum();
        let today = Self::sum_since(&entries, now - Duration::hours(24));
        let month = Self::sum_since(&entries, now - Duration::days(30));
        let count = entries.len();
        let avg = if count > 0 { total / count as f64 } else { 0.0 };
        CostMetrics {
            total,
            today,
            month,
            count,
            avg,
            daily_remaining: (self.daily_budget - today).max(0.0),
        }
    }

    /// Share of the daily budget spent in the last 24 h, in percent
    pub fn daily_usage_pct(&self, now: DateTime<Utc>) -> f64 {
        if self.daily_budget <= 0.0 {
            return 100.0;
        }
        let entries = self.entries.lock().unwrap();
        let today = Self::sum_since(&entries, now - Duration::hours(24));
        today / self.daily_budget * 100.0
    }

    pub fn exceeded_daily(&self, now: DateTime<Utc>) -> bool {
        self.metrics(now).today >= self.daily_budget
    }

    pub fn exceeded_monthly(&self, now: DateTime<Utc>) -> bool {
        self.metrics(now).month >= self.monthly_budget
    }

    /// Drop entries older than the retention window
    pub fn trim(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.timestamp > cutoff);
        before - entries.len()
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<CostEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn daily_budget(&self) -> f64 {
        self.daily_budget
    }

    pub fn monthly_budget(&self) -> f64 {
        self.monthly_budget
    }
}
