//! Conversation orchestrator
//!
//! Owns the session state machine and routes every event: audio frames in,
//! backend events out, tool calls through the executor, response audio to
//! the sink. Pulls a routing decision at startup and at each utterance
//! boundary, swapping backends when the decision changes.
//!
//! The orchestrator never raises once started; failures become events.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::{rms_energy, AudioFrame, AudioSink};
use crate::backend::{BackendEvent, EfficientBackend, EfficientConfig, PremiumBackend, PremiumConfig, VoiceBackend};
use crate::clock::Clock;
use crate::config::Config;
use crate::cost::{CostLedger, CostMetrics};
use crate::credentials::CredentialProvider;
use crate::events::{EventBus, Subscription};
use crate::functions::{ExecutorConfig, FunctionExecutor};
use crate::router::{AdaptiveRouter, RouterConfig};
use crate::types::{InteractionHint, Message, Mode, Role, SessionStatus, ToolCall};

/// Instructions shared by both backends
const VOICE_SYSTEM_PROMPT: &str = "You are a helpful voice assistant with access to functions \
that control this computer: launching apps, opening files and URLs, reading and managing files, \
window management, and volume. Keep responses short and conversational; they will be spoken \
aloud, so never use markdown, bullet points, or code blocks. Use functions when the user asks \
for an action, then summarize what you did in a sentence.";

/// Follow-up prompts for the idle nudge
const FOLLOW_UP_PROMPTS: &[&str] = &[
    "Briefly ask the user if there is anything else you can help with.",
    "Briefly check in with the user in a friendly way.",
];

/// Events published to the embedding shell
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Status(SessionStatus),
    Transcript { role: Role, text: String },
    Metrics(CostMetrics),
    AudioPlaying,
    AudioStopped,
    InteractionComplete,
    WakeWord,
    Error(String),
}

/// Snapshot of the session for state queries
#[derive(Debug, Clone)]
pub struct SessionState {
    pub status: SessionStatus,
    pub mode: Mode,
    pub metrics: CostMetrics,
}

/// Orchestrator tuning separate from the persisted config
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// End-of-utterance silence window in efficient mode
    pub silence_timeout_ms: u64,
    /// RMS threshold for the local speech gate
    pub speech_rms_threshold: f32,
    /// Idle delay before a conversational follow-up
    pub nudge_delay_secs: u64,
    /// Follow-ups per idle period
    pub max_nudges: u32,
    /// Spoken once on start when set
    pub greeting: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: 3_000,
            speech_rms_threshold: 200.0,
            nudge_delay_secs: 10,
            max_nudges: 2,
            greeting: None,
        }
    }
}

struct Inner {
    config: Config,
    orch: OrchestratorConfig,
    credentials: Arc<dyn CredentialProvider>,
    router: AdaptiveRouter,
    ledger: CostLedger,
    executor: FunctionExecutor,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AudioSink>,
    events: EventBus<AgentEvent>,
    status: Mutex<SessionStatus>,
    mode: Mutex<Mode>,
    /// Session transcript, appended strictly in order
    transcript: Mutex<Vec<Message>>,
    backend: Mutex<Option<Arc<VoiceBackend>>>,
    running: AtomicBool,
    /// Efficient-mode utterance in progress
    utterance_active: AtomicBool,
    last_speech_at: Mutex<Option<DateTime<Utc>>>,
    /// First audio chunk of the current response has been played
    audio_playing: AtomicBool,
    nudge_count: AtomicU32,
    /// Bumped to cancel armed nudge timers
    nudge_epoch: AtomicU64,
}

/// The conversation orchestrator (one per session)
#[derive(Clone)]
pub struct ConversationOrchestrator {
    inner: Arc<Inner>,
}

impl ConversationOrchestrator {
    pub fn new(
        config: Config,
        orch: OrchestratorConfig,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn AudioSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = CostLedger::new(config.budget.daily_budget, config.budget.monthly_budget);
        let router = AdaptiveRouter::new(
            RouterConfig {
                default_mode: config.routing.default_mode,
                budget_threshold_pct: config.routing.budget_threshold_pct,
                peak_hours_start: config.routing.peak_hours_start,
                peak_hours_end: config.routing.peak_hours_end,
            },
            ledger.clone(),
            clock.clone(),
        );
        let executor = FunctionExecutor::new(
            ExecutorConfig {
                blocked: config.security.blocked.clone(),
                require_confirmation: config.security.require_confirmation.clone(),
            },
            clock.clone(),
        );
        let default_mode = config.routing.default_mode;

        Self {
            inner: Arc::new(Inner {
                config,
                orch,
                credentials,
                router,
                ledger,
                executor,
                clock,
                sink,
                events: EventBus::new(),
                status: Mutex::new(SessionStatus::Idle),
                mode: Mutex::new(default_mode),
                transcript: Mutex::new(Vec::new()),
                backend: Mutex::new(None),
                running: AtomicBool::new(false),
                utterance_active: AtomicBool::new(false),
                last_speech_at: Mutex::new(None),
                audio_playing: AtomicBool::new(false),
                nudge_count: AtomicU32::new(0),
                nudge_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(
        config: Config,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn AudioSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(config, OrchestratorConfig::default(), credentials, sink, clock)
    }

    pub fn subscribe(&self) -> Subscription<AgentEvent> {
        self.inner.events.subscribe()
    }

    /// The executor, for registering the confirmation channel
    pub fn executor(&self) -> &FunctionExecutor {
        &self.inner.executor
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.inner.ledger
    }

    pub fn set_forced_mode(&self, mode: Option<Mode>) {
        self.inner.router.set_forced_mode(mode);
    }

    pub fn metrics(&self) -> CostMetrics {
        self.inner.ledger.metrics(self.inner.clock.now())
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            status: *self.inner.status.lock().unwrap(),
            mode: *self.inner.mode.lock().unwrap(),
            metrics: self.metrics(),
        }
    }

    /// Everything said this session, oldest first
    pub fn transcript(&self) -> Vec<Message> {
        self.inner.transcript.lock().unwrap().clone()
    }

    /// Route and connect the initial backend. Raises only for pre-connect
    /// failures (missing credentials, unreachable endpoint); everything
    /// after start is delivered as events.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let decision = self.inner.router.route(None);
        info!(mode = %decision.mode, reason = ?decision.reason, "starting session");

        if let Err(e) = Inner::activate_backend(&self.inner, decision.mode).await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if let Some(greeting) = self.inner.orch.greeting.clone() {
            let _ = self.send_text(&greeting);
        }
        self.inner.events.emit(AgentEvent::Metrics(self.metrics()));
        Ok(())
    }

    /// Tear the session down. Idempotent; pending retries and reconnect
    /// timers are cancelled, in-flight tool executions finish but their
    /// results are discarded.
    pub fn stop(&self) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.nudge_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.utterance_active.store(false, Ordering::SeqCst);
        *self.inner.last_speech_at.lock().unwrap() = None;
        self.inner.audio_playing.store(false, Ordering::SeqCst);
        self.inner.nudge_count.store(0, Ordering::SeqCst);

        if let Some(backend) = self.inner.backend.lock().unwrap().take() {
            backend.disconnect(true);
        }
        let _ = self.inner.sink.flush();
        self.inner.transcript.lock().unwrap().clear();

        if was_running || *self.inner.status.lock().unwrap() != SessionStatus::Idle {
            Inner::set_status(&self.inner, SessionStatus::Idle);
        }
        debug!("session stopped");
    }

    /// Recover from the error state by re-initializing
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.stop();
        self.start().await
    }

    /// Feed one captured frame. Discarded while speaking (echo
    /// suppression), in error, or when stopped.
    pub fn push_frame(&self, frame: AudioFrame) {
        let inner = &self.inner;
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let status = *inner.status.lock().unwrap();
        if matches!(status, SessionStatus::Speaking | SessionStatus::Error) {
            return;
        }
        let backend = match inner.backend.lock().unwrap().clone() {
            Some(b) => b,
            None => return,
        };

        match backend.mode() {
            Mode::Premium => {
                // Server-side VAD owns the utterance boundaries
                if let Err(e) = backend.append_audio(frame) {
                    debug!(error = %e, "frame dropped");
                }
            }
            Mode::Efficient => self.push_frame_local_vad(&backend, frame),
        }
    }

    /// Local silence timer: speech starts on RMS above the gate, the
    /// utterance commits after the configured silent window.
    fn push_frame_local_vad(&self, backend: &VoiceBackend, frame: AudioFrame) {
        let inner = &self.inner;
        let now = inner.clock.now();
        let rms = rms_energy(&frame.samples());
        let speaking = rms > inner.orch.speech_rms_threshold;

        if speaking {
            *inner.last_speech_at.lock().unwrap() = Some(now);
            if !inner.utterance_active.swap(true, Ordering::SeqCst) {
                Inner::set_status(inner, SessionStatus::Listening);
                Inner::reset_nudges(inner);
            }
            let _ = backend.append_audio(frame);
            return;
        }

        if !inner.utterance_active.load(Ordering::SeqCst) {
            return;
        }
        // Trailing silence stays part of the utterance
        let _ = backend.append_audio(frame);

        let elapsed_ms = inner
            .last_speech_at
            .lock()
            .unwrap()
            .map(|t| (now - t).num_milliseconds())
            .unwrap_or(0);
        if elapsed_ms >= inner.orch.silence_timeout_ms as i64 {
            inner.utterance_active.store(false, Ordering::SeqCst);
            *inner.last_speech_at.lock().unwrap() = None;
            info!(silence_ms = elapsed_ms, "end of utterance");
            Inner::set_status(inner, SessionStatus::Thinking);
            if let Err(e) = backend.commit_audio() {
                warn!(error = %e, "commit failed");
            }
        }
    }

    /// Inject a user text turn
    pub fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let inner = &self.inner;
        let backend = inner
            .backend
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("session is not started"))?;
        Inner::reset_nudges(inner);
        Inner::set_status(inner, SessionStatus::Listening);
        Inner::set_status(inner, SessionStatus::Thinking);
        Inner::record_turn(inner, Role::User, text.to_string());
        backend.send_text(text)
    }

    /// External wake signal; detection itself lives outside the core
    pub fn notify_wake(&self) {
        Inner::reset_nudges(&self.inner);
        self.inner.events.emit(AgentEvent::WakeWord);
    }

    /// Audio-source failure reported by the external capture layer.
    /// Fatal: the session needs a stop/start to recover.
    pub fn notify_source_error(&self, message: &str) {
        Inner::fatal(&self.inner, format!("audio source failed: {}", message));
    }
}

impl Inner {
    fn set_status(inner: &Arc<Inner>, next: SessionStatus) {
        let mut status = inner.status.lock().unwrap();
        if *status == next {
            return;
        }
        if !status.can_transition(next) {
            warn!(from = %status.as_str(), to = %next.as_str(), "illegal status transition dropped");
            return;
        }
        debug!(from = %status.as_str(), to = %next.as_str(), "status");
        *status = next;
        drop(status);
        inner.events.emit(AgentEvent::Status(next));
    }

    fn reset_nudges(inner: &Arc<Inner>) {
        inner.nudge_count.store(0, Ordering::SeqCst);
        inner.nudge_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Append to the session transcript and publish it
    fn record_turn(inner: &Arc<Inner>, role: Role, text: String) {
        inner
            .transcript
            .lock()
            .unwrap()
            .push(Message::new(role, &text, inner.clock.now()));
        inner.events.emit(AgentEvent::Transcript { role, text });
    }

    async fn activate_backend(inner: &Arc<Inner>, mode: Mode) -> anyhow::Result<()> {
        let backend = Arc::new(Self::build_backend(inner, mode).await?);
        let subscription = backend.subscribe();
        *inner.backend.lock().unwrap() = Some(backend);
        *inner.mode.lock().unwrap() = mode;

        let pump_inner = inner.clone();
        tokio::spawn(async move {
            Self::pump(pump_inner, subscription).await;
        });
        Ok(())
    }

    /// Credentials are queried here, at backend instantiation
    async fn build_backend(inner: &Arc<Inner>, mode: Mode) -> anyhow::Result<VoiceBackend> {
        let api_key = inner.credentials.api_key()?;
        let voice = inner
            .credentials
            .voice()
            .or_else(|| inner.config.voice.name.clone())
            .unwrap_or_else(|| "alloy".to_string());

        match mode {
            Mode::Premium => {
                let mut config =
                    PremiumConfig::new(api_key, voice, VOICE_SYSTEM_PROMPT.to_string());
                config.url = inner.config.api.realtime_url.clone();
                let backend =
                    PremiumBackend::connect(config, inner.ledger.clone(), inner.clock.clone())
                        .await?;
                Ok(VoiceBackend::Premium(backend))
            }
            Mode::Efficient => {
                let mut config =
                    EfficientConfig::new(api_key, voice, VOICE_SYSTEM_PROMPT.to_string());
                config.base_url = inner.config.api.base_url.clone();
                config.model = inner.config.api.reason_model.clone();
                config.voice_speed = inner.config.voice.speed;
                let backend =
                    EfficientBackend::new(config, inner.ledger.clone(), inner.clock.clone())?;
                Ok(VoiceBackend::Efficient(backend))
            }
        }
    }

    fn pump(
        inner: Arc<Inner>,
        mut subscription: Subscription<BackendEvent>,
    ) -> futures_util::future::BoxFuture<'static, ()> {
        Box::pin(async move {
            while let Some(event) = subscription.recv().await {
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                Self::handle_backend_event(&inner, event).await;
            }
            debug!("backend event pump ended");
        })
    }

    async fn handle_backend_event(inner: &Arc<Inner>, event: BackendEvent) {
        match event {
            BackendEvent::SessionReady => {
                debug!("backend session ready");
            }
            BackendEvent::SpeechStarted => {
                Self::reset_nudges(inner);
                Self::set_status(inner, SessionStatus::Listening);
            }
            BackendEvent::SpeechStopped => {
                Self::set_status(inner, SessionStatus::Thinking);
            }
            BackendEvent::Transcription(text) => {
                if !text.is_empty() {
                    Self::record_turn(inner, Role::User, text);
                }
            }
            BackendEvent::TextDelta(_) => {}
            BackendEvent::TextDone(text) => {
                if !text.is_empty() {
                    Self::record_turn(inner, Role::Assistant, text);
                }
            }
            BackendEvent::StageStarted(stage) => {
                debug!(stage = %stage, "pipeline stage");
            }
            BackendEvent::ToolCall(call) => {
                Self::run_tool_call(inner, call).await;
            }
            BackendEvent::AudioChunk(chunk) => {
                if !inner.audio_playing.swap(true, Ordering::SeqCst) {
                    Self::set_status(inner, SessionStatus::Speaking);
                    inner.events.emit(AgentEvent::AudioPlaying);
                }
                let rate = inner
                    .backend
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|b| b.playback_sample_rate())
                    .unwrap_or(crate::audio::PLAYBACK_SAMPLE_RATE);
                if let Err(e) = inner.sink.play(&chunk, rate) {
                    warn!(error = %e, "audio sink rejected chunk");
                }
            }
            BackendEvent::AudioDone => {
                debug!("response audio complete");
            }
            BackendEvent::ResponseDone => {
                Self::finish_interaction(inner).await;
            }
            BackendEvent::Retry {
                stage,
                attempt,
                delay_ms,
            } => {
                warn!(stage = %stage, attempt = attempt, delay_ms = delay_ms, "stage retry");
            }
            BackendEvent::Disconnected { code, reason } => {
                warn!(code = ?code, reason = %reason, "backend disconnected");
            }
            BackendEvent::Reconnecting { attempt, delay_ms } => {
                info!(attempt = attempt, delay_ms = delay_ms, "reconnecting");
            }
            BackendEvent::Reconnected { attempt } => {
                info!(attempt = attempt, "reconnected");
            }
            BackendEvent::ReconnectionFailed => {
                Self::fatal(inner, "reconnection failed after all attempts".to_string());
            }
            BackendEvent::Error(message) => {
                Self::fatal(inner, message);
            }
        }
    }

    /// Dispatch one tool call and return its result through the backend.
    /// Calls within a response arrive and complete strictly in order.
    async fn run_tool_call(inner: &Arc<Inner>, call: ToolCall) {
        info!(function = %call.name, call_id = %call.call_id, "tool call");
        Self::set_status(inner, SessionStatus::Executing);

        let result = inner.executor.execute_call(&call).await;

        // A session stopped mid-execution lets the side effect finish but
        // discards the result
        if !inner.running.load(Ordering::SeqCst) {
            debug!(call_id = %call.call_id, "tool result discarded after stop");
            return;
        }
        if let Some(backend) = inner.backend.lock().unwrap().clone() {
            if let Err(e) = backend.send_tool_result(&result.call_id, result.payload()) {
                warn!(error = %e, "failed to return tool result");
            }
        }
        Self::set_status(inner, SessionStatus::Thinking);
    }

    async fn finish_interaction(inner: &Arc<Inner>) {
        let _ = inner.sink.flush();
        if inner.audio_playing.swap(false, Ordering::SeqCst) {
            inner.events.emit(AgentEvent::AudioStopped);
        }
        inner.events.emit(AgentEvent::InteractionComplete);
        inner
            .events
            .emit(AgentEvent::Metrics(inner.ledger.metrics(inner.clock.now())));
        Self::set_status(inner, SessionStatus::Idle);

        Self::maybe_reroute(inner, None).await;
        Self::arm_nudge(inner);
    }

    /// Re-evaluate routing at the utterance boundary; budget exhaustion
    /// never interrupts an in-flight utterance, only the next decision.
    async fn maybe_reroute(inner: &Arc<Inner>, hint: Option<InteractionHint>) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let decision = inner.router.route(hint);
        let current = *inner.mode.lock().unwrap();
        if decision.mode == current {
            return;
        }
        info!(from = %current, to = %decision.mode, reason = ?decision.reason, "switching backend");

        if let Some(old) = inner.backend.lock().unwrap().take() {
            old.disconnect(true);
        }
        if let Err(e) = Self::activate_backend(inner, decision.mode).await {
            Self::fatal(inner, format!("backend switch failed: {}", e));
        }
    }

    /// Arm the idle follow-up timer, capped per idle period
    fn arm_nudge(inner: &Arc<Inner>) {
        let count = inner.nudge_count.load(Ordering::SeqCst);
        if count >= inner.orch.max_nudges {
            return;
        }
        let epoch = inner.nudge_epoch.load(Ordering::SeqCst);
        let delay = Duration::from_secs(inner.orch.nudge_delay_secs);
        let inner = inner.clone();

        tokio::spawn(async move {
            inner.clock.sleep(delay).await;
            if !inner.running.load(Ordering::SeqCst)
                || inner.nudge_epoch.load(Ordering::SeqCst) != epoch
                || *inner.status.lock().unwrap() != SessionStatus::Idle
            {
                return;
            }
            let count = inner.nudge_count.fetch_add(1, Ordering::SeqCst) as usize;
            let prompt = FOLLOW_UP_PROMPTS[count % FOLLOW_UP_PROMPTS.len()];
            info!(nudge = count + 1, "idle follow-up");

            let backend = inner.backend.lock().unwrap().clone();
            if let Some(backend) = backend {
                Self::set_status(&inner, SessionStatus::Listening);
                Self::set_status(&inner, SessionStatus::Thinking);
                let _ = backend.send_text(prompt);
            }
        });
    }

    fn fatal(inner: &Arc<Inner>, message: String) {
        warn!(error = %message, "fatal backend error");
        Self::set_status(inner, SessionStatus::Error);
        inner.events.emit(AgentEvent::Error(message));
    }
}
