// Error types for the media core.
//
// Transient store failures feed the retry loop; everything else is either
// terminal (engine), a caller mistake (validation) or plumbing (config, context).

use thiserror::Error;

/// Failures talking to the remote object store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport-level failure (connection refused, DNS, reset...)
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status
    #[error("Storage request failed (HTTP {status})")]
    Status { status: u16 },

    /// A probe found nothing at the URL
    #[error("Resource not reachable: {0}")]
    Unreachable(String),
}

/// Failures building a native playback engine from loaded bytes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Bytes could not be decoded; retrying will not help
    #[error("Unsupported audio: {0}")]
    Unsupported(String),

    /// No output device or the device refused the stream
    #[error("Audio device unavailable: {0}")]
    Device(String),
}

/// Rejected playback-session calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("No audio is ready to play")]
    NotReady,

    #[error("Playback session has been torn down")]
    Closed,
}

/// Upload-session errors returned synchronously, before any upload starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("Upload session has been torn down")]
    Closed,
}

/// Configuration loading or validation error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors loading or persisting the signed-in user.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Failed to access session file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse session file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the text-generation functions.
#[derive(Error, Debug)]
pub enum AiError {
    #[error("Function call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Function {function} returned HTTP {status}: {body}")]
    Status {
        function: String,
        status: u16,
        body: String,
    },
}
