//! Error handling for kernel-node-rs
//!
//! This module defines the crate-wide error type and a Result alias. Errors
//! fall into three families that a host pipeline can branch on via
//! [`KernelNodeError::kind`]:
//!
//! - **Configuration**: name collisions, missing slot bindings, a binding
//!   script that does not produce every declared output
//! - **Script**: parse or runtime failures inside the binding script
//! - **Backend**: kernel compilation, argument binding or launch failures, and
//!   an unusable backend session
//!
//! None of them are retried here. Every one aborts the current invocation only.

use crate::backend::BackendError;
use thiserror::Error;

/// Main error type for kernel node operations
#[derive(Error, Debug)]
pub enum KernelNodeError {
    /// Static configuration problems (collisions, missing outputs, bad bindings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while compiling or running the binding script
    #[error("Script error: {0}")]
    Script(String),

    /// Errors reported by the compute backend during dispatch
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The shared backend session could not be leased
    #[error("Session error: {0}")]
    Session(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<KernelNodeError>,
    },
}

/// Coarse classification of a [`KernelNodeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Script,
    Backend,
    Other,
}

impl KernelNodeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        KernelNodeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error, looking through any added context
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelNodeError::Config(_) => ErrorKind::Configuration,
            KernelNodeError::Script(_) => ErrorKind::Script,
            KernelNodeError::Backend(_) | KernelNodeError::Session(_) => ErrorKind::Backend,
            KernelNodeError::WithContext { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        }
    }
}

impl From<rhai::ParseError> for KernelNodeError {
    fn from(err: rhai::ParseError) -> Self {
        KernelNodeError::Script(format!("Compilation error: {}", err))
    }
}

impl From<toml::de::Error> for KernelNodeError {
    fn from(err: toml::de::Error) -> Self {
        KernelNodeError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for KernelNodeError {
    fn from(err: toml::ser::Error) -> Self {
        KernelNodeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for KernelNodeError {
    fn from(err: serde_json::Error) -> Self {
        KernelNodeError::Serialization(err.to_string())
    }
}

/// Result type alias for kernel node operations
pub type Result<T> = std::result::Result<T, KernelNodeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KernelNodeError::Config("Slot names must be unique".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Slot names must be unique"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = KernelNodeError::Script("unexpected token".to_string());
        let with_ctx = err.with_context("Binding script");
        assert!(with_ctx.to_string().contains("Binding script"));
        assert_eq!(with_ctx.kind(), ErrorKind::Script);
    }

    #[test]
    fn test_backend_error_kind() {
        let err: KernelNodeError = BackendError::Launch("device lost".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("device lost"));
    }

    #[test]
    fn test_session_error_is_backend_kind() {
        let err = KernelNodeError::Session("backend 'host' was poisoned".to_string());
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(KernelNodeError::Config("unknown slot".to_string()));
        let err = result.context("Binding inputs").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().starts_with("Binding inputs"));
    }
}
