//! Error taxonomy for the agent core
//!
//! Runtime paths return structured errors instead of panicking; the only
//! fail-fast path is recorder initialization in main. Decode and filter
//! failures never surface here - they are swallowed into drop counters.

use thiserror::Error;

/// Errors surfaced by the agent core
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing or invalid configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Sink unreachable, queue overflow, shutdown timeout; non-fatal at runtime
    #[error("exporter error: {0}")]
    Exporter(String),

    /// Caller contract violation (negative pid, empty target, unsupported code)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Raw record failed to decode
    #[error("decode error: {0}")]
    #[allow(dead_code)] // Decode failures are swallowed into drop counters
    Decode(String),

    /// Attempt to mutate a node whose span is already stopped
    #[error("lifecycle error: {0}")]
    #[allow(dead_code)] // Producer races are swallowed into drop counters
    Lifecycle(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
