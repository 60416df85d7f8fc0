//! Efficient backend: three-stage REST chain
//!
//! Each committed utterance runs transcribe -> reason -> synthesize against
//! the provider's REST endpoints. The rolling message window lives here
//! (the premium backend keeps history server-side). Every stage retries
//! transient failures with jittered backoff and reports its cost.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::audio::{wav, AudioFrame, CAPTURE_SAMPLE_RATE};
use crate::clock::Clock;
use crate::cost::{CostLedger, StageUnits};
use crate::events::{EventBus, Subscription};
use crate::functions::catalog;
use crate::resilience::{is_transient, with_retry, BackoffPolicy};
use crate::types::{Mode, Stage, ToolCall};

use super::BackendEvent;

/// Bound on the whole synthesis call
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Non-system messages kept in the rolling window
pub const HISTORY_LIMIT: usize = 10;

/// Ceiling on reason->tool->reason rounds within one utterance
const MAX_TOOL_ROUNDS: usize = 10;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct EfficientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub transcription_model: String,
    pub language: Option<String>,
    pub tts_model: String,
    pub voice: String,
    pub voice_speed: f32,
    pub instructions: String,
}

impl EfficientConfig {
    pub fn new(api_key: String, voice: String, instructions: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            transcription_model: "whisper-1".to_string(),
            language: None,
            tts_model: "tts-1".to_string(),
            voice,
            voice_speed: 1.0,
            instructions,
        }
    }
}

/// Wire-format chat message for the reasoning endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<Value>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Parsed outcome of one reasoning round
#[derive(Debug, Default)]
pub struct ReasonOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Raw tool_calls array, echoed back into history
    pub raw_tool_calls: Vec<Value>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Three-stage REST conversation engine
#[derive(Clone)]
pub struct EfficientBackend {
    config: EfficientConfig,
    http: reqwest::Client,
    events: EventBus<BackendEvent>,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    buffer: Arc<Mutex<Vec<u8>>>,
    pending_tools: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    ledger: CostLedger,
    clock: Arc<dyn Clock>,
    active: Arc<AtomicBool>,
}

impl EfficientBackend {
    pub fn new(config: EfficientConfig, ledger: CostLedger, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("efficient backend requires an API key");
        }
        let mut history = Vec::new();
        if !config.instructions.is_empty() {
            history.push(ChatMessage::system(&config.instructions));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
            events: EventBus::new(),
            history: Arc::new(Mutex::new(history)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            pending_tools: Arc::new(Mutex::new(HashMap::new())),
            ledger,
            clock,
            active: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn subscribe(&self) -> Subscription<BackendEvent> {
        self.events.subscribe()
    }

    /// MP3 payloads from the TTS endpoint decode at this rate
    pub fn output_sample_rate(&self) -> u32 {
        24_000
    }

    pub fn append_audio(&self, frame: AudioFrame) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            bail!("backend is disconnected");
        }
        self.buffer.lock().unwrap().extend_from_slice(&frame.data);
        Ok(())
    }

    /// End of utterance: run the chain on everything buffered
    pub fn commit_audio(&self) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            bail!("backend is disconnected");
        }
        let pcm = std::mem::take(&mut *self.buffer.lock().unwrap());
        if pcm.is_empty() {
            debug!("commit with empty buffer, nothing to do");
            return Ok(());
        }
        let backend = self.clone();
        tokio::spawn(async move { backend.run_utterance(pcm).await });
        Ok(())
    }

    /// Inject a user text turn, skipping transcription
    pub fn send_text(&self, text: &str) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            bail!("backend is disconnected");
        }
        let backend = self.clone();
        let text = text.to_string();
        tokio::spawn(async move { backend.run_exchange(text).await });
        Ok(())
    }

    /// Answer an outstanding tool call; the reasoning loop resumes
    pub fn send_tool_result(&self, call_id: &str, payload: Value) -> Result<()> {
        let sender = self.pending_tools.lock().unwrap().remove(call_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(payload);
                Ok(())
            }
            None => {
                warn!(call_id = %call_id, "tool result for unknown call");
                Ok(())
            }
        }
    }

    /// Bytes buffered for the current utterance
    pub fn buffered_audio_len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Clear the rolling window (protocol resync)
    pub fn clear_history(&self) {
        let mut history = self.history.lock().unwrap();
        history.retain(|m| m.role == "system");
    }

    pub fn disconnect(&self, _intentional: bool) {
        self.active.store(false, Ordering::SeqCst);
        self.buffer.lock().unwrap().clear();
        // Dropping pending senders unblocks any in-flight exchange;
        // its results are discarded
        self.pending_tools.lock().unwrap().clear();
        self.clear_history();
    }

    pub fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().unwrap().clone()
    }

    // ---- pipeline ----

    async fn run_utterance(&self, pcm: Vec<u8>) {
        let audio_secs = pcm.len() as f64 / 2.0 / CAPTURE_SAMPLE_RATE as f64;
        self.events.emit(BackendEvent::StageStarted(Stage::Transcribe));

        let text = match self.transcribe_with_retry(&pcm).await {
            Ok(text) => text,
            Err(e) => {
                self.events
                    .emit(BackendEvent::Error(format!("transcription failed: {}", e)));
                return;
            }
        };
        self.ledger.record(
            Mode::Efficient,
            StageUnits::Transcribe { audio_secs },
            self.clock.now(),
        );
        self.events.emit(BackendEvent::Transcription(text.clone()));

        if text.trim().is_empty() {
            debug!("empty transcription, skipping response");
            self.events.emit(BackendEvent::ResponseDone);
            return;
        }
        self.run_exchange(text).await;
    }

    async fn run_exchange(&self, user_text: String) {
        self.events.emit(BackendEvent::StageStarted(Stage::Reason));
        {
            let mut history = self.history.lock().unwrap();
            history.push(ChatMessage::user(&user_text));
            trim_history(&mut history, HISTORY_LIMIT);
        }

        let mut final_text = String::new();
        for round in 0..MAX_TOOL_ROUNDS {
            let messages = self.history.lock().unwrap().clone();
            let outcome = match self.reason_with_retry(messages).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.events
                        .emit(BackendEvent::Error(format!("reasoning failed: {}", e)));
                    return;
                }
            };
            self.ledger.record(
                Mode::Efficient,
                StageUnits::Reason {
                    input_tokens: outcome.input_tokens,
                    output_tokens: outcome.output_tokens,
                },
                self.clock.now(),
            );

            if outcome.tool_calls.is_empty() {
                final_text = outcome.content;
                let mut history = self.history.lock().unwrap();
                history.push(ChatMessage::assistant(&final_text));
                trim_history(&mut history, HISTORY_LIMIT);
                break;
            }

            info!(round = round, calls = outcome.tool_calls.len(), "model requested tools");
            {
                let mut history = self.history.lock().unwrap();
                history.push(ChatMessage::assistant_with_tools(
                    if outcome.content.is_empty() {
                        None
                    } else {
                        Some(outcome.content.clone())
                    },
                    outcome.raw_tool_calls.clone(),
                ));
                trim_history(&mut history, HISTORY_LIMIT);
            }

            // Sequential: each call is emitted and answered before the next
            for call in outcome.tool_calls {
                let (tx, rx) = oneshot::channel();
                self.pending_tools
                    .lock()
                    .unwrap()
                    .insert(call.call_id.clone(), tx);
                let call_id = call.call_id.clone();
                self.events.emit(BackendEvent::ToolCall(call));

                let payload = match rx.await {
                    Ok(payload) => payload,
                    Err(_) => {
                        // Session stopped mid-call; discard the exchange
                        debug!(call_id = %call_id, "tool result channel dropped");
                        return;
                    }
                };
                let mut history = self.history.lock().unwrap();
                history.push(ChatMessage::tool_result(&call_id, payload.to_string()));
                trim_history(&mut history, HISTORY_LIMIT);
            }
        }

        self.events.emit(BackendEvent::TextDone(final_text.clone()));

        self.events.emit(BackendEvent::StageStarted(Stage::Synthesize));
        let audio = match self.synthesize_with_retry(&final_text).await {
            Ok(audio) => audio,
            Err(e) => {
                self.events
                    .emit(BackendEvent::Error(format!("synthesis failed: {}", e)));
                return;
            }
        };
        self.ledger.record(
            Mode::Efficient,
            StageUnits::Synthesize {
                characters: final_text.chars().count() as u64,
            },
            self.clock.now(),
        );

        if !audio.is_empty() {
            self.events.emit(BackendEvent::AudioChunk(audio));
        }
        self.events.emit(BackendEvent::AudioDone);
        self.events.emit(BackendEvent::ResponseDone);
    }

    // ---- stages ----

    async fn transcribe_with_retry(&self, pcm: &[u8]) -> Result<String> {
        let events = self.events.clone();
        with_retry(
            "transcribe",
            &BackoffPolicy::rest_stage(),
            &self.clock,
            |e| is_transient(&format!("{:#}", e)),
            move |attempt, delay| {
                events.emit(BackendEvent::Retry {
                    stage: Stage::Transcribe,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            },
            || self.transcribe(pcm),
        )
        .await
    }

    /// Wrap PCM in a WAV container and submit it. The temp file lives only
    /// for this call; deletion happens on drop either way.
    async fn transcribe(&self, pcm: &[u8]) -> Result<String> {
        let wav_bytes = wav::encode(pcm, wav::WavSpec::mono_16khz());

        let mut temp = tempfile::NamedTempFile::new().context("cannot create temp WAV")?;
        temp.write_all(&wav_bytes).context("cannot write temp WAV")?;
        let upload = tokio::fs::read(temp.path())
            .await
            .context("cannot read back temp WAV")?;

        let part = reqwest::multipart::Part::bytes(upload)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone());
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("transcription API error ({}): {}", status, body);
        }

        let parsed: Value = response.json().await.context("bad transcription response")?;
        Ok(parsed["text"].as_str().unwrap_or_default().trim().to_string())
    }

    async fn reason_with_retry(&self, messages: Vec<ChatMessage>) -> Result<ReasonOutcome> {
        let events = self.events.clone();
        with_retry(
            "reason",
            &BackoffPolicy::rest_stage(),
            &self.clock,
            |e| is_transient(&format!("{:#}", e)),
            move |attempt, delay| {
                events.emit(BackendEvent::Retry {
                    stage: Stage::Reason,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            },
            || self.reason(messages.clone()),
        )
        .await
    }

    async fn reason(&self, messages: Vec<ChatMessage>) -> Result<ReasonOutcome> {
        let request = json!({
            "model": self.config.model,
            "messages": messages,
            "tools": catalog::chat_tool_definitions(),
            "tool_choice": "auto",
            "max_tokens": 1024,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .context("reasoning request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("reasoning API error ({}): {}", status, body);
        }

        // Parse as raw Value; strict structs break on provider quirks
        let raw: Value = response.json().await.context("bad reasoning response")?;
        parse_chat_response(&raw)
    }

    async fn synthesize_with_retry(&self, text: &str) -> Result<Vec<u8>> {
        // Empty text yields an empty buffer without touching the service
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let events = self.events.clone();
        tokio::time::timeout(
            SYNTHESIS_TIMEOUT,
            with_retry(
                "synthesize",
                &BackoffPolicy::rest_stage(),
                &self.clock,
                |e| is_transient(&format!("{:#}", e)),
                move |attempt, delay| {
                    events.emit(BackendEvent::Retry {
                        stage: Stage::Synthesize,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                },
                || self.synthesize(text),
            ),
        )
        .await
        .map_err(|_| anyhow::anyhow!("synthesis timed out after {:?}", SYNTHESIS_TIMEOUT))?
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        use futures_util::StreamExt;

        let request = json!({
            "model": self.config.tts_model,
            "voice": self.config.voice,
            "input": text,
            "speed": self.config.voice_speed.clamp(0.25, 4.0),
        });

        let response = self
            .http
            .post(format!("{}/audio/speech", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .context("synthesis request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("synthesis API error ({}): {}", status, body);
        }

        let mut stream = response.bytes_stream();
        let mut audio = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("synthesis stream failed")?;
            audio.extend_from_slice(&chunk);
        }
        Ok(audio)
    }
}

/// Keep the optional system message plus at most `limit` newer messages,
/// dropping oldest first.
pub fn trim_history(history: &mut Vec<ChatMessage>, limit: usize) {
    let system: Vec<ChatMessage> = history.iter().filter(|m| m.role == "system").cloned().collect();
    let others: Vec<ChatMessage> = history.iter().filter(|m| m.role != "system").cloned().collect();

    let keep_from = others.len().saturating_sub(limit);
    let mut trimmed = system;
    trimmed.extend_from_slice(&others[keep_from..]);
    *history = trimmed;
}

/// Extract content, tool calls, and usage from a chat completion
pub fn parse_chat_response(raw: &Value) -> Result<ReasonOutcome> {
    let message = raw["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .map(|choice| &choice["message"])
        .ok_or_else(|| anyhow::anyhow!("no message in response"))?;

    // Content may be a string or an array of content parts
    let content = match &message["content"] {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| {
                if p["type"] == "text" {
                    p["text"].as_str().map(String::from)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    let raw_tool_calls: Vec<Value> = message["tool_calls"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let tool_calls = raw_tool_calls
        .iter()
        .map(|tc| {
            // Arguments arrive as a JSON string or a raw object depending
            // on the model
            let arguments = match &tc["function"]["arguments"] {
                Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
                Value::Null => Value::Null,
                other => other.clone(),
            };
            ToolCall {
                call_id: tc["id"].as_str().unwrap_or_default().to_string(),
                name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            }
        })
        .collect();

    Ok(ReasonOutcome {
        content,
        tool_calls,
        raw_tool_calls,
        input_tokens: raw["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: raw["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn backend() -> EfficientBackend {
        let config = EfficientConfig::new(
            "sk-test".to_string(),
            "alloy".to_string(),
            "You are a voice assistant.".to_string(),
        );
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(12));
        EfficientBackend::new(config, CostLedger::new(1.0, 30.0), clock).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let config = EfficientConfig::new(String::new(), "alloy".to_string(), String::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(12));
        assert!(EfficientBackend::new(config, CostLedger::new(1.0, 30.0), clock).is_err());
    }

    #[test]
    fn test_history_trim_bound() {
        let mut history = vec![ChatMessage::system("sys")];
        for i in 0..30 {
            history.push(ChatMessage::user(format!("msg {}", i)));
            trim_history(&mut history, HISTORY_LIMIT);
            assert!(history.len() <= HISTORY_LIMIT + 1);
        }
        // Oldest non-system messages dropped first
        assert_eq!(history[0].role, "system");
        assert_eq!(history[1].content.as_deref(), Some("msg 20"));
    }

    #[test]
    fn test_trim_without_system() {
        let mut history: Vec<ChatMessage> =
            (0..15).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        trim_history(&mut history, HISTORY_LIMIT);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].content.as_deref(), Some("m5"));
    }

    #[test]
    fn test_parse_text_response() {
        let raw = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello there" } }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 7 },
        });
        let outcome = parse_chat_response(&raw).unwrap();
        assert_eq!(outcome.content, "Hello there");
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(outcome.input_tokens, 42);
        assert_eq!(outcome.output_tokens, 7);
    }

    #[test]
    fn test_parse_content_parts() {
        let raw = json!({
            "choices": [{ "message": { "content": [
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "world"},
            ]}}],
        });
        let outcome = parse_chat_response(&raw).unwrap();
        assert_eq!(outcome.content, "Hello world");
    }

    #[test]
    fn test_parse_tool_calls_string_and_object_args() {
        let raw = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [
                    { "id": "c1", "function": { "name": "read_file", "arguments": "{\"path\":\"/tmp/a\"}" } },
                    { "id": "c2", "function": { "name": "get_time", "arguments": {} } },
                ],
            }}],
        });
        let outcome = parse_chat_response(&raw).unwrap();
        assert_eq!(outcome.tool_calls.len(), 2);
        assert_eq!(outcome.tool_calls[0].arguments["path"], "/tmp/a");
        assert_eq!(outcome.tool_calls[1].name, "get_time");
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_skips_synthesis() {
        let backend = backend();
        let audio = backend.synthesize_with_retry("").await.unwrap();
        assert!(audio.is_empty());
        let audio = backend.synthesize_with_retry("   ").await.unwrap();
        assert!(audio.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_rejects_audio() {
        let backend = backend();
        let frame = AudioFrame::new(vec![0u8; 320], CAPTURE_SAMPLE_RATE, chrono::Utc::now());
        assert!(backend.append_audio(frame.clone()).is_ok());

        backend.disconnect(true);
        assert!(backend.append_audio(frame).is_err());
        assert!(backend.commit_audio().is_err());
    }

    #[tokio::test]
    async fn test_tool_result_for_unknown_call_is_ignored() {
        let backend = backend();
        assert!(backend.send_tool_result("nope", json!({"ok": true})).is_ok());
    }

    #[test]
    fn test_clear_history_keeps_system() {
        let backend = backend();
        backend.history.lock().unwrap().push(ChatMessage::user("hi"));
        backend.clear_history();
        let history = backend.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "system");
    }
}
