//! vox-agent - Adaptive Voice Agent Library
//!
//! A budget-aware voice agent core:
//! - Streaming speech-to-speech session with automatic reconnection
//! - Transcribe -> reason -> synthesize REST fallback with per-stage retry
//! - Adaptive routing between the two on live cost, time of day, and hints
//! - Sandboxed function execution with an async confirmation protocol
//! - Append-only cost ledger with daily/monthly budget checks
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vox_agent::audio::NullSink;
//! use vox_agent::clock::SystemClock;
//! use vox_agent::config::Config;
//! use vox_agent::credentials::KeyringCredentials;
//! use vox_agent::orchestrator::ConversationOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let agent = ConversationOrchestrator::from_config(
//!         Config::load()?,
//!         Arc::new(KeyringCredentials::new()),
//!         Arc::new(NullSink),
//!         Arc::new(SystemClock),
//!     );
//!     agent.start().await?;
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod clock;
pub mod events;
pub mod config;
pub mod credentials;

// Infrastructure
pub mod audio;
pub mod cost;
pub mod resilience;
pub mod security;

// Feature modules
pub mod backend;
pub mod functions;
pub mod router;
pub mod orchestrator;

// Re-export commonly used types for convenience
pub use config::Config;

pub use cost::{CostLedger, CostMetrics};

pub use orchestrator::{AgentEvent, ConversationOrchestrator, SessionState};

pub use router::AdaptiveRouter;

pub use types::{Mode, RouteReason, RoutingDecision, SessionStatus};

pub use functions::{ExecError, FunctionExecutor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Adaptive Voice Agent Library", NAME, VERSION)
}
