//! Error types for warc-drain
//!
//! This module defines the error hierarchy that covers:
//! - Filename parsing (per-file, recoverable on the next scan)
//! - Configuration and credentials (fatal at startup)
//! - Object store sessions and transfers (per-task, recoverable)
//!
//! Only startup errors ([`DrainError`]) ever stop the process. Everything
//! else is logged where it happens and retried by a later directory scan.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the warc-drain application
#[derive(Error, Debug)]
pub enum DrainError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential loading errors
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// Object store client could not be built
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Ctrl+C handler could not be installed
    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Errors produced while decoding a WARC filename
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    /// Not enough dash-separated segments, or a bad process-qualified tail
    #[error("Malformed filename '{filename}': {reason}")]
    MalformedFilename { filename: String, reason: String },

    /// Timestamp segment shorter than 14 characters
    #[error("Timestamp '{timestamp}' in '{filename}' is shorter than 14 characters")]
    TimestampTooShort { filename: String, timestamp: String },

    /// The configured naming convention is not one we know how to parse
    #[error("Unknown WARC naming convention {0}")]
    UnknownNamingConvention(u8),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Cannot read config file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is neither JSON nor YAML
    #[error("Config file '{path}' is neither valid JSON nor YAML")]
    UnknownFormat { path: PathBuf },

    /// Native (JSON) config failed to decode
    #[error("Invalid JSON config '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Legacy (YAML) config failed to decode
    #[error("Invalid legacy YAML config '{path}': {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Invalid upload thread count
    #[error("Invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Scan interval of zero
    #[error("Scan interval must be at least 1 second")]
    InvalidScanInterval,

    /// Item size budget of zero
    #[error("Item size must be greater than zero")]
    InvalidItemSize,

    /// Human-readable size string that does not parse
    #[error("Invalid size '{0}': expected a number with an optional KB/MB/GB/TB suffix")]
    InvalidSize(String),

    /// Watch directory missing from config
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),

    /// Watch directory does not exist or is not a directory
    #[error("Invalid WARC directory '{path}': {reason}")]
    InvalidWatchDir { path: PathBuf, reason: String },
}

/// Errors while loading S3 credentials
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// The credentials file could not be read
    #[error("Cannot read credentials file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The [default] section does not carry both keys
    #[error("Credentials file '{path}' has no access_key/secret_key in its [default] section")]
    MissingKeys { path: PathBuf },

    /// No flags given and no file location could be resolved
    #[error("No S3 credentials given and $HOME is not set")]
    NoHome,
}

/// Object store session and transfer errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Session could not be created
    #[error("Failed to open upload session: {reason}")]
    Session { reason: String },

    /// Remote rejected the upload
    #[error("Upload of '{key}' to '{item}' rejected with HTTP {status}: {body}")]
    Status {
        item: String,
        key: String,
        status: u16,
        body: String,
    },

    /// Transport failure (connection reset, DNS, TLS...)
    #[error("Transport error uploading '{key}': {reason}")]
    Transport { key: String, reason: String },

    /// Local file could not be read during the transfer
    #[error("Local I/O error on '{path}': {source}")]
    Local {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    /// Check if a later attempt is likely to succeed
    ///
    /// Only used to pick a log level; retries always come from rescanning.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport { .. } | StoreError::Local { .. } => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Session { .. } => false,
        }
    }
}

/// Failure of a single upload task, tagged with the phase it failed in
#[derive(Error, Debug)]
pub enum UploadError {
    /// Filename no longer parses (config changed, file renamed)
    #[error("Cannot derive metadata: {0}")]
    Parse(#[from] FilenameError),

    /// Local file could not be opened
    #[error("Cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Local file could not be stat'ed
    #[error("Cannot stat '{path}': {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Object store session failed to initialize
    #[error("Session setup failed: {0}")]
    Session(StoreError),

    /// Transfer started but did not complete
    #[error("Transfer failed: {0}")]
    Transfer(StoreError),
}

impl UploadError {
    /// Short label for the phase that failed, used as a log field
    pub fn phase(&self) -> &'static str {
        match self {
            UploadError::Parse(_) => "parse",
            UploadError::Open { .. } => "open",
            UploadError::Stat { .. } => "stat",
            UploadError::Session(_) => "session",
            UploadError::Transfer(_) => "transfer",
        }
    }
}

/// Result type alias for DrainError
pub type Result<T> = std::result::Result<T, DrainError>;

/// Result type alias for FilenameError
pub type FilenameResult<T> = std::result::Result<T, FilenameError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
