//! Callable functions
//!
//! The catalog defines what the model may call; the executor validates,
//! authorizes, and performs the calls through the tool host.

pub mod catalog;
pub mod executor;
pub mod host;

pub use catalog::{catalog, FunctionDef};
pub use executor::{ConfirmationRequest, ExecutorConfig, FunctionExecutor};

/// Typed failure for a tool call. Surfaced to the backend as a tool-result
/// error payload; the session continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Function name is in the configured blocked set
    Blocked(String),
    /// Function name is not in the catalog
    UnknownFunction(String),
    /// Arguments failed schema validation or a size limit
    InvalidArguments(String),
    /// Path resolved outside the allowed base directories
    PathDenied(String),
    /// URL scheme or host is not allowed
    UrlDenied(String),
    /// Shell command failed the read-only policy
    CommandDenied(String),
    /// Application is not on the launch whitelist
    AppDenied(String),
    /// Confirmation channel denied or is absent
    NotApproved(String),
    /// The side effect itself failed
    Failed(String),
}

impl ExecError {
    /// Stable code included in the error payload sent back to the model
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Blocked(_) => "Blocked",
            ExecError::UnknownFunction(_) => "UnknownFunction",
            ExecError::InvalidArguments(_) => "InvalidArguments",
            ExecError::PathDenied(_) => "PathDenied",
            ExecError::UrlDenied(_) => "UrlDenied",
            ExecError::CommandDenied(_) => "CommandDenied",
            ExecError::AppDenied(_) => "AppDenied",
            ExecError::NotApproved(_) => "NotApproved",
            ExecError::Failed(_) => "Failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExecError::Blocked(m)
            | ExecError::UnknownFunction(m)
            | ExecError::InvalidArguments(m)
            | ExecError::PathDenied(m)
            | ExecError::UrlDenied(m)
            | ExecError::CommandDenied(m)
            | ExecError::AppDenied(m)
            | ExecError::NotApproved(m)
            | ExecError::Failed(m) => m,
        }
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ExecError {}
