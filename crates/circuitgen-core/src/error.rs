//! Error types for the generation pipeline.
//!
//! The `Generation`, `Compilation` and `Runtime` variants render in the same
//! form that is recorded in a candidate's error set and later fed back to the
//! prompt improver, so their display strings are part of the contract.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while generating, checking, repairing or assembling programs.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The model returned no content for a generation or fixing request.
    #[error("Generation API Error: {0}")]
    Generation(String),

    /// The generated program failed the compile check.
    #[error("Compilation Error:\n{0}")]
    Compilation(String),

    /// The generated program compiled but failed when executed.
    #[error("Runtime Error:\n{0}")]
    Runtime(String),

    /// A prompt template file does not exist.
    #[error("prompt template not found at {}", .0.display())]
    MissingTemplate(PathBuf),

    /// Rewriting the generation prompt failed.
    #[error("prompt improvement failed: {0}")]
    Improvement(String),

    /// Assembling a combination of programs failed.
    #[error("assembly failed: {0}")]
    Assembly(String),

    /// The model transport or provider reported an error.
    #[error("model request failed: {0}")]
    Model(String),

    /// A program checker could not be invoked.
    #[error("checker failed: {0}")]
    Checker(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations.
pub type ForgeResult<T> = Result<T, ForgeError>;
