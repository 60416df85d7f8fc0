//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation backend mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Streaming speech-to-speech over a persistent session
    Premium,
    /// Sequential transcribe -> reason -> synthesize REST chain
    Efficient,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Premium => write!(f, "premium"),
            Mode::Efficient => write!(f, "efficient"),
        }
    }
}

/// Session status owned by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Executing,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Listening => "listening",
            SessionStatus::Thinking => "thinking",
            SessionStatus::Speaking => "speaking",
            SessionStatus::Executing => "executing",
            SessionStatus::Error => "error",
        }
    }

    /// Whether `next` is a legal transition from this status.
    ///
    /// Any state may enter Error; Error only recovers to Idle.
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if next == Error {
            return true;
        }
        match self {
            Idle => matches!(next, Listening | Idle),
            Listening => matches!(next, Thinking | Idle),
            Thinking => matches!(next, Executing | Speaking | Idle),
            Executing => matches!(next, Thinking | Idle),
            Speaking => matches!(next, Idle | Listening),
            Error => matches!(next, Idle),
        }
    }
}

/// Billable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Realtime,
    Transcribe,
    Reason,
    Synthesize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Realtime => write!(f, "realtime"),
            Stage::Transcribe => write!(f, "transcribe"),
            Stage::Reason => write!(f, "reason"),
            Stage::Synthesize => write!(f, "synthesize"),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Convert to the OpenAI-style role string
    pub fn to_openai_string(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse from an OpenAI-style role string
    pub fn from_openai_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_openai_string())
    }
}

/// A single message in a conversation.
///
/// Never mutated once appended to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp,
            tool_call: None,
            tool_result: None,
        }
    }
}

/// A model-issued request to execute a named function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique per session
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Terminal outcome of a tool call. Each call_id is answered exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, result: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            result: Some(result),
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(call_id: impl Into<String>, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            result: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    /// Payload handed back to the model over the backend's tool-result channel
    pub fn payload(&self) -> serde_json::Value {
        match (&self.result, &self.error) {
            (Some(result), _) => result.clone(),
            (None, Some(error)) => serde_json::json!({ "success": false, "error": error }),
            (None, None) => serde_json::json!({ "success": false, "error": "no result" }),
        }
    }
}

/// Why the router picked a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    UserPreference,
    CostLimit,
    TimeOfDay,
    InteractionType,
    Default,
}

/// Per-utterance backend choice. Ephemeral; recomputed per interaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub mode: Mode,
    pub reason: RouteReason,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
}

/// Caller-supplied hint about the coming interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionHint {
    /// Short command-like exchange; the cheap chain is good enough
    Simple,
    /// Open-ended conversation
    Conversational,
}
