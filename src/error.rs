//! Error types for the agent loop.
//!
//! Collaborator errors never leave a cycle: the perception assembler turns
//! them into degraded snapshot fields and the action runner turns them into
//! step errors. Only [`LoopError`] reaches the caller of a task.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Screen capture produced no usable image.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("screen capture not available on this platform")]
    NotAvailable,

    #[error("failed to capture screen: {0}")]
    CaptureFailed(String),

    #[error("captured image could not be decoded: {0}")]
    Decode(String),

    #[error("screen capture timed out after {0:?}")]
    TimedOut(Duration),
}

/// Accessibility provider fault (listing, clicking or foreground queries).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("accessibility provider not available: {0}")]
    Unsupported(String),

    #[error("accessibility helper failed: {0}")]
    Helper(String),

    #[error("unreadable accessibility output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("accessibility call timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document source failed: {0}")]
    Source(String),

    #[error("document extraction timed out after {0:?}")]
    TimedOut(Duration),
}

/// The script interpreter could not be invoked at all.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("could not write script to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script runner not available: {0}")]
    Unsupported(String),

    #[error("script timed out after {0:?}")]
    TimedOut(Duration),
}

/// A decision oracle could not produce a reply.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected oracle response: {0}")]
    Malformed(String),

    #[error("oracle call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Faults in the loop's own bookkeeping. These end a task abnormally.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("could not create task storage at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
