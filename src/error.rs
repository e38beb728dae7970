//! Collaborator-visible engine errors
//!
//! Only environment and lifecycle problems surface here. Per-frame and
//! per-session decoder failures are logged and absorbed by the scheduler.

/// Engine API errors
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Capability check failed; caller should fall back to a static preview
    Unsupported(String),
    /// Not every worker signaled readiness before the timeout
    WorkerStartup { ready: usize, expected: usize },
    /// Operation requires a running worker pool
    ShutDown,
    InvalidOptions(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Unsupported(e) => write!(f, "Environment not supported: {}", e),
            EngineError::WorkerStartup { ready, expected } => {
                write!(f, "Decode workers not ready: {}/{}", ready, expected)
            }
            EngineError::ShutDown => write!(f, "Engine is shut down"),
            EngineError::InvalidOptions(e) => write!(f, "Invalid mount options: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}
