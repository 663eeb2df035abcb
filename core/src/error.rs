// Error types for the core library
// Uses thiserror for ergonomic error handling

use std::io;
use thiserror::Error;

/// Main error type for core library operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Structural validation failure; fatal at startup
    #[error("InvalidProfile: {0}")]
    InvalidProfile(String),

    /// A `{…}` pattern survived the resolution pipeline
    #[error("UnresolvedSnippet: unresolved tokens {0:?} in '{1}'")]
    UnresolvedSnippet(Vec<String>, String),

    /// Expression failed to parse or yielded null/undefined at the top level
    #[error("SnippetEvalError: {0}")]
    SnippetEvalError(String),

    /// ffprobe could not be executed or returned an error
    #[error("ProbeFailed: {0}")]
    ProbeFailed(String),

    /// The probe returned no usable media metadata
    #[error("NotAMedia: {0}")]
    NotAMedia(String),

    /// A Worker was executed a second time; programmer error
    #[error("AlreadyExecuted: worker for '{0}' has already run")]
    AlreadyExecuted(String),

    /// The transcoder subprocess reported an error
    #[error("TranscodeFailed: {0}")]
    TranscodeFailed(String),

    /// Filesystem call failed
    #[error("FileSystemError: {0}")]
    FileSystemError(#[from] io::Error),

    /// Probe output could not be parsed
    #[error("Failed to parse probe output: {0}")]
    ParseError(String),
}

/// Convenience type alias for Results using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
