//! Premium backend: streaming speech-to-speech
//!
//! One long-lived WebSocket session carries control frames and
//! base64-encoded audio both ways. The server runs voice-activity
//! detection; we stream raw PCM up and get 24 kHz PCM, transcript deltas,
//! and tool calls back. Unsolicited disconnects trigger exponential-backoff
//! reconnection; an intentional disconnect suppresses it.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Message as WsMessage, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::clock::Clock;
use crate::cost::{CostLedger, StageUnits};
use crate::events::{EventBus, Subscription};
use crate::functions::catalog;
use crate::resilience::BackoffPolicy;
use crate::types::{Mode, ToolCall};

use super::BackendEvent;

/// Handshake budget for each connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview";

/// Server-side VAD parameters sent in the session configuration
#[derive(Debug, Clone, Copy)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PremiumConfig {
    pub url: String,
    pub api_key: String,
    pub voice: String,
    pub instructions: String,
    pub temperature: f32,
    pub vad: VadSettings,
}

impl PremiumConfig {
    pub fn new(api_key: String, voice: String, instructions: String) -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            api_key,
            voice,
            instructions,
            temperature: 0.8,
            vad: VadSettings::default(),
        }
    }

    /// The session-configuration frame sent after every (re)connect
    fn session_update(&self) -> Value {
        json!({
            "type": "session.update",
            "session": {
                "modalities": ["text", "audio"],
                "instructions": self.instructions,
                "voice": self.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": { "model": "whisper-1" },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": self.vad.threshold,
                    "prefix_padding_ms": self.vad.prefix_padding_ms,
                    "silence_duration_ms": self.vad.silence_duration_ms,
                },
                "tools": catalog::realtime_tool_definitions(),
                "temperature": self.temperature,
            }
        })
    }
}

enum Command {
    Frame(Vec<u8>),
    Commit,
    Text(String),
    ToolResult { call_id: String, payload: Value },
    Reconnect,
    Close,
}

enum SessionEnd {
    Closed,
    ReconnectRequested,
    Dropped { code: Option<u16>, reason: String },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Streaming speech-to-speech session
pub struct PremiumBackend {
    events: EventBus<BackendEvent>,
    commands: mpsc::UnboundedSender<Command>,
    intentional: Arc<AtomicBool>,
}

impl PremiumBackend {
    /// Connect and configure a session. Fails synchronously on missing
    /// credentials or an unreachable endpoint; everything after that is
    /// delivered as events.
    pub async fn connect(
        config: PremiumConfig,
        ledger: CostLedger,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("premium backend requires an API key");
        }

        let ws = open_socket(&config).await?;
        info!(url = %config.url, "realtime session connected");

        let events = EventBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let intentional = Arc::new(AtomicBool::new(false));

        tokio::spawn(session_task(
            ws,
            config,
            events.clone(),
            rx,
            intentional.clone(),
            ledger,
            clock,
        ));

        Ok(Self {
            events,
            commands: tx,
            intentional,
        })
    }

    pub fn subscribe(&self) -> Subscription<BackendEvent> {
        self.events.subscribe()
    }

    pub fn append_audio(&self, frame: AudioFrame) -> Result<()> {
        self.send(Command::Frame(frame.data))
    }

    pub fn commit_audio(&self) -> Result<()> {
        self.send(Command::Commit)
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Command::Text(text.to_string()))
    }

    pub fn send_tool_result(&self, call_id: &str, payload: Value) -> Result<()> {
        self.send(Command::ToolResult {
            call_id: call_id.to_string(),
            payload,
        })
    }

    /// Request a fresh connection cycle with the attempt counter reset
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    pub fn disconnect(&self, intentional: bool) {
        if intentional {
            self.intentional.store(true, Ordering::SeqCst);
        }
        let _ = self.commands.send(Command::Close);
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("realtime session is closed"))
    }
}

async fn open_socket(config: &PremiumConfig) -> Result<WsStream> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .context("invalid realtime URL")?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.api_key)
            .parse()
            .context("invalid API key header")?,
    );
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse().unwrap());

    let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .context("realtime connection timed out")?
        .context("realtime connection failed")?;
    Ok(ws)
}

/// Tracks billable units between response boundaries
#[derive(Default)]
struct UsageAccumulator {
    audio_in_secs: f64,
    audio_out_secs: f64,
}

impl UsageAccumulator {
    fn add_input(&mut self, pcm_bytes: usize) {
        self.audio_in_secs += pcm_bytes as f64 / 2.0 / CAPTURE_SAMPLE_RATE as f64;
    }

    fn add_output(&mut self, pcm_bytes: usize) {
        self.audio_out_secs += pcm_bytes as f64 / 2.0 / PLAYBACK_SAMPLE_RATE as f64;
    }

    fn settle(&mut self, usage: &Value, ledger: &CostLedger, clock: &Arc<dyn Clock>) {
        let text_in = usage["input_token_details"]["text_tokens"]
            .as_u64()
            .unwrap_or(0);
        let text_out = usage["output_token_details"]["text_tokens"]
            .as_u64()
            .unwrap_or(0);
        ledger.record(
            Mode::Premium,
            StageUnits::Realtime {
                audio_in_secs: self.audio_in_secs,
                audio_out_secs: self.audio_out_secs,
                text_in_tokens: text_in,
                text_out_tokens: text_out,
            },
            clock.now(),
        );
        self.audio_in_secs = 0.0;
        self.audio_out_secs = 0.0;
    }
}

async fn session_task(
    mut ws: WsStream,
    config: PremiumConfig,
    events: EventBus<BackendEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    intentional: Arc<AtomicBool>,
    ledger: CostLedger,
    clock: Arc<dyn Clock>,
) {
    let mut usage = UsageAccumulator::default();

    if send_json(&mut ws, &config.session_update()).await.is_err() {
        events.emit(BackendEvent::Error("session configuration failed".to_string()));
    }

    loop {
        let end = drive(&mut ws, &mut commands, &events, &mut usage, &ledger, &clock).await;

        match end {
            SessionEnd::Closed => {
                let _ = ws.close(None).await;
                debug!("realtime session closed");
                return;
            }
            SessionEnd::ReconnectRequested => {
                let _ = ws.close(None).await;
            }
            SessionEnd::Dropped { code, reason } => {
                if intentional.load(Ordering::SeqCst) {
                    return;
                }
                warn!(code = ?code, reason = %reason, "realtime transport dropped");
                events.emit(BackendEvent::Disconnected { code, reason });
            }
        }

        match reconnect_cycle(&config, &events, &intentional, &clock).await {
            Some(new_ws) => {
                ws = new_ws;
                if send_json(&mut ws, &config.session_update()).await.is_err() {
                    events.emit(BackendEvent::Error(
                        "session reconfiguration failed".to_string(),
                    ));
                }
            }
            None => {
                if intentional.load(Ordering::SeqCst) {
                    return;
                }
                events.emit(BackendEvent::ReconnectionFailed);
                // Stay alive for an explicit reconnect()
                loop {
                    match commands.recv().await {
                        Some(Command::Reconnect) => {
                            match reconnect_cycle(&config, &events, &intentional, &clock).await {
                                Some(new_ws) => {
                                    ws = new_ws;
                                    let _ = send_json(&mut ws, &config.session_update()).await;
                                    break;
                                }
                                None => {
                                    events.emit(BackendEvent::ReconnectionFailed);
                                }
                            }
                        }
                        Some(Command::Close) | None => return,
                        // Audio sent while the transport is down is discarded
                        Some(_) => {}
                    }
                }
            }
        }
    }
}

/// Pump commands out and server events in until the session ends
async fn drive(
    ws: &mut WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &EventBus<BackendEvent>,
    usage: &mut UsageAccumulator,
    ledger: &CostLedger,
    clock: &Arc<dyn Clock>,
) -> SessionEnd {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let frame = match command {
                    None | Some(Command::Close) => return SessionEnd::Closed,
                    Some(Command::Reconnect) => return SessionEnd::ReconnectRequested,
                    Some(Command::Frame(pcm)) => {
                        usage.add_input(pcm.len());
                        json!({
                            "type": "input_audio_buffer.append",
                            "audio": BASE64.encode(&pcm),
                        })
                    }
                    Some(Command::Commit) => {
                        if send_json(ws, &json!({"type": "input_audio_buffer.commit"})).await.is_err() {
                            return SessionEnd::Dropped { code: None, reason: "send failed".to_string() };
                        }
                        json!({"type": "response.create"})
                    }
                    Some(Command::Text(text)) => {
                        let item = json!({
                            "type": "conversation.item.create",
                            "item": {
                                "type": "message",
                                "role": "user",
                                "content": [{ "type": "input_text", "text": text }],
                            }
                        });
                        if send_json(ws, &item).await.is_err() {
                            return SessionEnd::Dropped { code: None, reason: "send failed".to_string() };
                        }
                        json!({"type": "response.create"})
                    }
                    Some(Command::ToolResult { call_id, payload }) => {
                        let item = json!({
                            "type": "conversation.item.create",
                            "item": {
                                "type": "function_call_output",
                                "call_id": call_id,
                                "output": payload.to_string(),
                            }
                        });
                        if send_json(ws, &item).await.is_err() {
                            return SessionEnd::Dropped { code: None, reason: "send failed".to_string() };
                        }
                        json!({"type": "response.create"})
                    }
                };
                if send_json(ws, &frame).await.is_err() {
                    return SessionEnd::Dropped { code: None, reason: "send failed".to_string() };
                }
            }

            message = ws.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(event) => handle_server_event(&event, events, usage, ledger, clock),
                            Err(e) => debug!(error = %e, "unparseable server event"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, "closed".to_string()));
                        return SessionEnd::Dropped { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return SessionEnd::Dropped { code: None, reason: e.to_string() };
                    }
                    None => {
                        return SessionEnd::Dropped { code: None, reason: "stream ended".to_string() };
                    }
                }
            }
        }
    }
}

/// Decode one server event into backend events
fn handle_server_event(
    event: &Value,
    events: &EventBus<BackendEvent>,
    usage: &mut UsageAccumulator,
    ledger: &CostLedger,
    clock: &Arc<dyn Clock>,
) {
    match event["type"].as_str().unwrap_or("") {
        "session.created" | "session.updated" => {
            if event["type"] == "session.created" {
                events.emit(BackendEvent::SessionReady);
            }
        }
        "input_audio_buffer.speech_started" => events.emit(BackendEvent::SpeechStarted),
        "input_audio_buffer.speech_stopped" => events.emit(BackendEvent::SpeechStopped),
        "response.audio.delta" => {
            if let Some(b64) = event["delta"].as_str() {
                match BASE64.decode(b64) {
                    Ok(pcm) => {
                        usage.add_output(pcm.len());
                        events.emit(BackendEvent::AudioChunk(pcm));
                    }
                    Err(e) => debug!(error = %e, "bad audio delta"),
                }
            }
        }
        "response.audio.done" => events.emit(BackendEvent::AudioDone),
        "response.audio_transcript.delta" => {
            if let Some(delta) = event["delta"].as_str() {
                events.emit(BackendEvent::TextDelta(delta.to_string()));
            }
        }
        "response.audio_transcript.done" => {
            if let Some(transcript) = event["transcript"].as_str() {
                events.emit(BackendEvent::TextDone(transcript.to_string()));
            }
        }
        "conversation.item.input_audio_transcription.completed" => {
            if let Some(transcript) = event["transcript"].as_str() {
                events.emit(BackendEvent::Transcription(transcript.trim().to_string()));
            }
        }
        "response.function_call_arguments.done" => {
            let call_id = event["call_id"].as_str().unwrap_or_default().to_string();
            let name = event["name"].as_str().unwrap_or_default().to_string();
            let arguments = event["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            events.emit(BackendEvent::ToolCall(ToolCall {
                call_id,
                name,
                arguments,
            }));
        }
        "response.done" => {
            usage.settle(&event["response"]["usage"], ledger, clock);
            events.emit(BackendEvent::ResponseDone);
        }
        "error" => {
            let message = event["error"]["message"]
                .as_str()
                .unwrap_or("unknown server error")
                .to_string();
            events.emit(BackendEvent::Error(message));
        }
        other => debug!(event_type = %other, "ignoring server event"),
    }
}

/// Backoff loop over at most `max_retries` attempts. Emits
/// Reconnecting/Reconnected; returns None when every attempt failed.
async fn reconnect_cycle(
    config: &PremiumConfig,
    events: &EventBus<BackendEvent>,
    intentional: &Arc<AtomicBool>,
    clock: &Arc<dyn Clock>,
) -> Option<WsStream> {
    let policy = BackoffPolicy::reconnect();

    for attempt in 1..=policy.max_retries {
        if intentional.load(Ordering::SeqCst) {
            return None;
        }
        let delay = policy.delay_for(attempt);
        events.emit(BackendEvent::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        clock.sleep(delay).await;

        if intentional.load(Ordering::SeqCst) {
            return None;
        }
        match open_socket(config).await {
            Ok(ws) => {
                info!(attempt = attempt, "realtime session reconnected");
                events.emit(BackendEvent::Reconnected { attempt });
                return Some(ws);
            }
            Err(e) => {
                warn!(attempt = attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    None
}

async fn send_json(ws: &mut WsStream, value: &Value) -> Result<()> {
    ws.send(WsMessage::Text(Utf8Bytes::from(value.to_string())))
        .await
        .context("websocket send failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_setup() -> (EventBus<BackendEvent>, UsageAccumulator, CostLedger, Arc<dyn Clock>) {
        (
            EventBus::new(),
            UsageAccumulator::default(),
            CostLedger::new(1.0, 30.0),
            Arc::new(ManualClock::at_hour(12)),
        )
    }

    #[test]
    fn test_session_update_shape() {
        let config = PremiumConfig::new("sk-test".to_string(), "alloy".to_string(), "hi".to_string());
        let update = config.session_update();
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["voice"], "alloy");
        assert_eq!(update["session"]["input_audio_format"], "pcm16");
        assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(update["session"]["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(update["session"]["turn_detection"]["silence_duration_ms"], 500);
        assert!(update["session"]["tools"].as_array().unwrap().len() > 10);
    }

    #[test]
    fn test_server_event_mapping() {
        let (events, mut usage, ledger, clock) = test_setup();
        let mut sub = events.subscribe();

        handle_server_event(&json!({"type": "session.created"}), &events, &mut usage, &ledger, &clock);
        handle_server_event(
            &json!({"type": "input_audio_buffer.speech_started"}),
            &events,
            &mut usage,
            &ledger,
            &clock,
        );
        handle_server_event(
            &json!({"type": "response.audio_transcript.delta", "delta": "hel"}),
            &events,
            &mut usage,
            &ledger,
            &clock,
        );

        assert!(matches!(sub.try_recv(), Some(BackendEvent::SessionReady)));
        assert!(matches!(sub.try_recv(), Some(BackendEvent::SpeechStarted)));
        assert!(matches!(sub.try_recv(), Some(BackendEvent::TextDelta(d)) if d == "hel"));
    }

    #[test]
    fn test_audio_delta_decoded_and_metered() {
        let (events, mut usage, ledger, clock) = test_setup();
        let mut sub = events.subscribe();

        let pcm = vec![1u8, 2, 3, 4];
        let event = json!({"type": "response.audio.delta", "delta": BASE64.encode(&pcm)});
        handle_server_event(&event, &events, &mut usage, &ledger, &clock);

        assert!(matches!(sub.try_recv(), Some(BackendEvent::AudioChunk(c)) if c == pcm));
        assert!(usage.audio_out_secs > 0.0);
    }

    #[test]
    fn test_tool_call_event() {
        let (events, mut usage, ledger, clock) = test_setup();
        let mut sub = events.subscribe();

        let event = json!({
            "type": "response.function_call_arguments.done",
            "call_id": "call_42",
            "name": "read_file",
            "arguments": "{\"path\": \"/tmp/x\"}",
        });
        handle_server_event(&event, &events, &mut usage, &ledger, &clock);

        match sub.try_recv() {
            Some(BackendEvent::ToolCall(call)) => {
                assert_eq!(call.call_id, "call_42");
                assert_eq!(call.name, "read_file");
                assert_eq!(call.arguments["path"], "/tmp/x");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_response_done_records_cost() {
        let (events, mut usage, ledger, clock) = test_setup();
        let mut sub = events.subscribe();

        usage.add_input(32_000); // 1 s of 16 kHz input
        usage.add_output(48_000); // 1 s of 24 kHz output
        let event = json!({
            "type": "response.done",
            "response": { "usage": {
                "input_token_details": { "text_tokens": 20 },
                "output_token_details": { "text_tokens": 80 },
            }},
        });
        handle_server_event(&event, &events, &mut usage, &ledger, &clock);

        assert!(matches!(sub.try_recv(), Some(BackendEvent::ResponseDone)));
        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stage, crate::types::Stage::Realtime);
        assert!(entries[0].amount > 0.0);
        // Accumulator resets after settling
        assert_eq!(usage.audio_in_secs, 0.0);
        assert_eq!(usage.audio_out_secs, 0.0);
    }

    #[test]
    fn test_error_event() {
        let (events, mut usage, ledger, clock) = test_setup();
        let mut sub = events.subscribe();
        let event = json!({"type": "error", "error": {"message": "session expired"}});
        handle_server_event(&event, &events, &mut usage, &ledger, &clock);
        assert!(matches!(sub.try_recv(), Some(BackendEvent::Error(m)) if m == "session expired"));
    }

    #[tokio::test]
    async fn test_connect_requires_api_key() {
        let config = PremiumConfig::new(String::new(), "alloy".to_string(), String::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(12));
        let result = PremiumBackend::connect(config, CostLedger::new(1.0, 30.0), clock).await;
        assert!(result.is_err());
    }
}
