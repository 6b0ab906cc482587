//! # NativeKit Common
//!
//! Error reporting and logging setup shared by the NativeKit crates.
//!
//! Each library crate keeps its own error enum (`ShaderError`, `EngineError`,
//! ...). Front ends flatten those into [`NativeKitError`], whose
//! [`ErrorCategory`] decides how a failure is logged and whether the content
//! author or the host is to blame.

use std::fmt;

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// GLSL that failed to parse, validate or link.
    Shader,
    /// Backend resource or command failure.
    Gpu,
    /// Undecodable or unsupported image data.
    Image,
    Io,
    /// Work dropped because the engine was disposed.
    Cancelled,
    NotFound,
    InvalidArgument,
    /// A bug: panics on the worker pool and broken invariants.
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Shader => "shader",
            ErrorCategory::Gpu => "gpu",
            ErrorCategory::Image => "image",
            ErrorCategory::Io => "io",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Whether the failure lies in scene content (shaders, images) rather
    /// than in the host.
    pub fn is_content(self) -> bool {
        matches!(self, ErrorCategory::Shader | ErrorCategory::Image)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Front-end error carrying a category, a message and the underlying cause.
#[derive(Error, Debug)]
#[error("{category} error: {message}")]
pub struct NativeKitError {
    category: ErrorCategory,
    message: String,
    #[source]
    source: Option<BoxError>,
    backtrace: Option<backtrace::Backtrace>,
}

impl NativeKitError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
            backtrace: None,
        }
    }

    /// Internal errors capture a backtrace at construction.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            backtrace: Some(backtrace::Backtrace::new()),
            ..Self::new(ErrorCategory::Internal, message)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCategory::Cancelled, "operation cancelled")
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> Option<&backtrace::Backtrace> {
        self.backtrace.as_ref()
    }

    pub fn is_content_error(&self) -> bool {
        self.category.is_content()
    }
}

impl From<std::io::Error> for NativeKitError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCategory::Io, err.to_string()).with_source(err)
    }
}

/// Result type alias for NativeKit front ends.
pub type Result<T> = std::result::Result<T, NativeKitError>;

/// Attach a category and a message to a foreign error.
pub trait ResultExt<T> {
    fn context(self, category: ErrorCategory, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, category: ErrorCategory, message: impl Into<String>) -> Result<T> {
        self.map_err(|err| {
            let message = format!("{}: {err}", message.into());
            NativeKitError::new(category, message).with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_includes_category() {
        let err = NativeKitError::new(ErrorCategory::Gpu, "view 300 out of range");
        assert_eq!(err.to_string(), "gpu error: view 300 out of range");
        assert_eq!(err.message(), "view 300 out of range");
    }

    #[test]
    fn test_content_errors() {
        assert!(NativeKitError::new(ErrorCategory::Shader, "parse").is_content_error());
        assert!(NativeKitError::new(ErrorCategory::Image, "decode").is_content_error());
        assert!(!NativeKitError::new(ErrorCategory::Gpu, "view").is_content_error());
        assert!(!NativeKitError::cancelled().is_content_error());
    }

    #[test]
    fn test_io_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "scene.json");
        let err: NativeKitError = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(err.source().map(|s| s.to_string()), Some("scene.json".to_string()));
        assert!(err.backtrace().is_none());
    }

    #[test]
    fn test_context_prefixes_message() {
        let failed: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        let err = failed.context(ErrorCategory::Io, "writing scene.dump.json").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(err.message(), "writing scene.dump.json: denied");
    }

    #[test]
    fn test_internal_captures_backtrace() {
        let err = NativeKitError::internal("worker panicked");
        assert_eq!(err.category().as_str(), "internal");
        assert!(err.backtrace().is_some());
    }
}
