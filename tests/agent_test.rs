//! Orchestrator lifecycle through the public bridge surface

use std::sync::Arc;
use std::time::Duration;

use vox_agent::audio::{AudioFrame, MemorySink, CAPTURE_SAMPLE_RATE};
use vox_agent::clock::{Clock, ManualClock};
use vox_agent::config::Config;
use vox_agent::credentials::StaticCredentials;
use vox_agent::orchestrator::{AgentEvent, ConversationOrchestrator};
use vox_agent::types::{Mode, SessionStatus};

fn agent_at_hour(hour: u32) -> (ConversationOrchestrator, ManualClock) {
    let clock = ManualClock::at_hour(hour);
    let mut config = Config::default();
    // Keep any accidental network traffic on the loopback
    config.api.base_url = "http://127.0.0.1:9".to_string();

    let agent = ConversationOrchestrator::from_config(
        config,
        Arc::new(StaticCredentials::new("sk-test").with_voice("nova")),
        Arc::new(MemorySink::new()),
        Arc::new(clock.clone()),
    );
    (agent, clock)
}

fn loud_frame(clock: &ManualClock) -> AudioFrame {
    let samples: Vec<u8> = (0..1600)
        .flat_map(|i| {
            let v: i16 = if i % 2 == 0 { 6000 } else { -6000 };
            v.to_le_bytes()
        })
        .collect();
    AudioFrame::new(samples, CAPTURE_SAMPLE_RATE, clock.now())
}

#[tokio::test]
async fn start_stop_lifecycle() {
    let (agent, _) = agent_at_hour(5);
    assert_eq!(agent.state().status, SessionStatus::Idle);

    agent.start().await.unwrap();
    let state = agent.state();
    assert_eq!(state.status, SessionStatus::Idle);
    assert_eq!(state.mode, Mode::Efficient); // off-peak routing

    agent.stop();
    assert_eq!(agent.state().status, SessionStatus::Idle);

    // stop() twice behaves like stop() once
    agent.stop();
    assert_eq!(agent.state().status, SessionStatus::Idle);
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let (agent, _) = agent_at_hour(5);
    agent.start().await.unwrap();
    agent.start().await.unwrap();
    assert_eq!(agent.state().status, SessionStatus::Idle);
    agent.stop();
}

#[tokio::test]
async fn missing_credentials_fail_at_start() {
    let clock = ManualClock::at_hour(5);
    let agent = ConversationOrchestrator::from_config(
        Config::default(),
        Arc::new(StaticCredentials::new("")),
        Arc::new(MemorySink::new()),
        Arc::new(clock),
    );
    assert!(agent.start().await.is_err());
    // A failed start leaves the session stoppable and restartable
    agent.stop();
    assert_eq!(agent.state().status, SessionStatus::Idle);
}

#[tokio::test]
async fn frames_drive_listening_state() {
    let (agent, clock) = agent_at_hour(5);
    agent.start().await.unwrap();
    let mut events = agent.subscribe();

    agent.push_frame(loud_frame(&clock));
    assert_eq!(agent.state().status, SessionStatus::Listening);

    let seen: Vec<AgentEvent> = events.drain();
    assert!(seen
        .iter()
        .any(|e| matches!(e, AgentEvent::Status(SessionStatus::Listening))));
    agent.stop();
}

#[tokio::test]
async fn forced_mode_reflected_in_routing() {
    let (agent, _) = agent_at_hour(5);
    agent.set_forced_mode(Some(Mode::Efficient));
    agent.start().await.unwrap();
    assert_eq!(agent.state().mode, Mode::Efficient);
    agent.stop();
}

#[tokio::test]
async fn metrics_start_empty() {
    let (agent, _) = agent_at_hour(12);
    let metrics = agent.metrics();
    assert_eq!(metrics.count, 0);
    assert_eq!(metrics.total, 0.0);
    assert!((metrics.daily_remaining - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn wake_signal_is_surfaced() {
    let (agent, _) = agent_at_hour(5);
    agent.start().await.unwrap();
    let mut events = agent.subscribe();

    agent.notify_wake();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(events.drain().iter().any(|e| matches!(e, AgentEvent::WakeWord)));
    agent.stop();
}
