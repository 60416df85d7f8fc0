//! Conversation backends
//!
//! Two engines speak the same protocol to the orchestrator: audio in,
//! audio + tool calls + transcript out. The premium engine holds a
//! bidirectional streaming session; the efficient engine chains three REST
//! calls per utterance. The orchestrator is polymorphic over the tagged
//! variant, not a trait object.

pub mod efficient;
pub mod premium;

use anyhow::Result;

use crate::audio::AudioFrame;
use crate::events::Subscription;
use crate::types::{Mode, Stage, ToolCall};

pub use efficient::{EfficientBackend, EfficientConfig};
pub use premium::{PremiumBackend, PremiumConfig};

/// Everything a backend can tell the orchestrator
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Session is configured and ready for audio
    SessionReady,
    /// Server-side VAD saw the user start speaking
    SpeechStarted,
    /// Server-side VAD saw the user stop speaking
    SpeechStopped,
    /// Chunk of response audio (PCM for premium, encoded for efficient)
    AudioChunk(Vec<u8>),
    /// Response audio finished
    AudioDone,
    /// Incremental response text
    TextDelta(String),
    /// Full response text
    TextDone(String),
    /// The model asked for a function call
    ToolCall(ToolCall),
    /// The current response (text, audio, tool calls) is complete
    ResponseDone,
    /// Final transcription of the user's utterance
    Transcription(String),
    /// The REST chain entered a stage
    StageStarted(Stage),
    /// A stage is being retried after a transient failure
    Retry {
        stage: Stage,
        attempt: u32,
        delay_ms: u64,
    },
    /// Streaming transport dropped; reconnection may follow
    Disconnected {
        code: Option<u16>,
        reason: String,
    },
    /// A reconnect attempt is scheduled
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    /// Reconnect succeeded on the given attempt
    Reconnected {
        attempt: u32,
    },
    /// All reconnect attempts failed
    ReconnectionFailed,
    /// Backend-fatal error
    Error(String),
}

/// Tagged variant over the two engines with the common capability set
pub enum VoiceBackend {
    Premium(PremiumBackend),
    Efficient(EfficientBackend),
}

impl VoiceBackend {
    pub fn mode(&self) -> Mode {
        match self {
            VoiceBackend::Premium(_) => Mode::Premium,
            VoiceBackend::Efficient(_) => Mode::Efficient,
        }
    }

    /// Sample rate of the audio this backend emits
    pub fn playback_sample_rate(&self) -> u32 {
        match self {
            VoiceBackend::Premium(_) => crate::audio::PLAYBACK_SAMPLE_RATE,
            // The TTS provider returns an encoded container; the sink gets
            // whatever rate the decoder reports
            VoiceBackend::Efficient(b) => b.output_sample_rate(),
        }
    }

    pub fn subscribe(&self) -> Subscription<BackendEvent> {
        match self {
            VoiceBackend::Premium(b) => b.subscribe(),
            VoiceBackend::Efficient(b) => b.subscribe(),
        }
    }

    pub fn append_audio(&self, frame: AudioFrame) -> Result<()> {
        match self {
            VoiceBackend::Premium(b) => b.append_audio(frame),
            VoiceBackend::Efficient(b) => b.append_audio(frame),
        }
    }

    /// End of utterance; ask for a response
    pub fn commit_audio(&self) -> Result<()> {
        match self {
            VoiceBackend::Premium(b) => b.commit_audio(),
            VoiceBackend::Efficient(b) => b.commit_audio(),
        }
    }

    /// Inject a user text turn
    pub fn send_text(&self, text: &str) -> Result<()> {
        match self {
            VoiceBackend::Premium(b) => b.send_text(text),
            VoiceBackend::Efficient(b) => b.send_text(text),
        }
    }

    /// Answer a tool call
    pub fn send_tool_result(&self, call_id: &str, payload: serde_json::Value) -> Result<()> {
        match self {
            VoiceBackend::Premium(b) => b.send_tool_result(call_id, payload),
            VoiceBackend::Efficient(b) => b.send_tool_result(call_id, payload),
        }
    }

    /// Tear down. `intentional` suppresses reconnection on the premium side.
    pub fn disconnect(&self, intentional: bool) {
        match self {
            VoiceBackend::Premium(b) => b.disconnect(intentional),
            VoiceBackend::Efficient(b) => b.disconnect(intentional),
        }
    }
}
