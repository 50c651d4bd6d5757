//! Error types for the sandbox runner.
//!
//! All errors are fail-closed: anything the runner cannot positively verify
//! is rejected, never executed on a best guess.

use thiserror::Error;

/// Errors that can occur while handling a sandboxed execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The request envelope could not be decoded.
    #[error("invalid request envelope: {0}")]
    Protocol(String),

    /// A process-wide resource ceiling could not be applied. Fatal: running
    /// without the ceiling would silently void the containment guarantee.
    #[error("resource limit could not be applied: {0}")]
    Limiter(String),

    /// The restricted compiler rejected the submitted source.
    #[error("Code compilation failed (restricted): {0}")]
    Compile(String),

    /// The wall-clock deadline was exceeded.
    #[error("Execution timeout")]
    Timeout,

    /// The allocation ceiling was reached.
    #[error("Memory limit exceeded")]
    Memory,

    /// An uncaught fault inside the executed code.
    #[error("Execution error: {0}")]
    Runtime(String),

    /// The resolved entry operation could not be invoked or raised.
    #[error("Tool entry point failed: {0}")]
    EntryPoint(String),
}

impl SandboxError {
    /// Stable classification label, independent of message details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Limiter(_) => "limiter",
            Self::Compile(_) => "compile",
            Self::Timeout => "timeout",
            Self::Memory => "memory",
            Self::Runtime(_) => "runtime",
            Self::EntryPoint(_) => "entry_point",
        }
    }

    /// True for the conditions that abort the process instead of producing
    /// a normal `ok:false` envelope.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Limiter(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            SandboxError::Protocol("x".into()),
            SandboxError::Limiter("x".into()),
            SandboxError::Compile("x".into()),
            SandboxError::Timeout,
            SandboxError::Memory,
            SandboxError::Runtime("x".into()),
            SandboxError::EntryPoint("x".into()),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn timeout_and_memory_messages_are_recognizable() {
        assert!(SandboxError::Timeout.to_string().to_lowercase().contains("timeout"));
        assert!(SandboxError::Memory.to_string().to_lowercase().contains("memory"));
    }

    #[test]
    fn only_protocol_and_limiter_are_fatal() {
        assert!(SandboxError::Protocol("x".into()).is_fatal());
        assert!(SandboxError::Limiter("x".into()).is_fatal());
        assert!(!SandboxError::Compile("x".into()).is_fatal());
        assert!(!SandboxError::Timeout.is_fatal());
        assert!(!SandboxError::Memory.is_fatal());
        assert!(!SandboxError::Runtime("x".into()).is_fatal());
        assert!(!SandboxError::EntryPoint("x".into()).is_fatal());
    }
}
