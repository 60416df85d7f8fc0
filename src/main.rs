//! vox-agent - Adaptive Voice Agent
//!
//! Headless runner: wires the orchestrator from config and runs until
//! interrupted. Audio device plumbing and UI live in the embedding shell;
//! this binary logs events and uses a discarding sink.

use std::sync::Arc;
use tracing::{error, info};

use vox_agent::audio::NullSink;
use vox_agent::clock::SystemClock;
use vox_agent::config::Config;
use vox_agent::credentials::KeyringCredentials;
use vox_agent::orchestrator::{AgentEvent, ConversationOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for more)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    info!("{}", vox_agent::info());

    let config = Config::load()?;
    let agent = ConversationOrchestrator::from_config(
        config,
        Arc::new(KeyringCredentials::new()),
        Arc::new(NullSink),
        Arc::new(SystemClock),
    );

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Status(status) => info!(status = %status.as_str(), "status"),
                AgentEvent::Transcript { role, text } => info!(role = %role, "{}", text),
                AgentEvent::Metrics(metrics) => {
                    info!(total = %format!("{:.4}", metrics.total), today = %format!("{:.4}", metrics.today), "cost")
                }
                AgentEvent::Error(message) => error!("{}", message),
                other => info!(event = ?other, "event"),
            }
        }
    });

    agent.start().await?;
    info!("agent running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    agent.stop();
    info!("stopped");
    Ok(())
}
