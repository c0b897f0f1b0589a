use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubGenError {
    #[error("Invalid input: {0}")]
    BadInput(String),

    #[error("Configuration error at '{path}': {message}")]
    BadConfig { path: String, message: String },

    #[error("Missing component '{id}'. Install it with: subgen install {id}")]
    MissingComponent { id: String },

    #[error("Integrity verification unavailable for '{id}': {reason}")]
    MissingIntegrity { id: String, reason: String },

    #[error("Archive entry '{entry}' would escape the install directory")]
    UnsafeArchive { entry: String },

    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Malformed recognizer output: {0}")]
    BadTranscriptionOutput(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Proofreading failed: {0}")]
    Proofread(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Credential error for '{provider}': {message}")]
    Credential { provider: String, message: String },

    #[error("Invalid color '{0}': expected #RRGGBB or #AARRGGBB")]
    BadColor(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache schema version {found} is not supported (expected {expected})")]
    IncompatibleCache { found: u32, expected: u32 },

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubGenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn bad_config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadConfig {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI layer.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BadInput(_) => 2,
            Self::BadConfig { .. } => 3,
            Self::MissingComponent { .. } => 4,
            Self::Credential { .. } => 5,
            Self::Cancelled => 6,
            _ => 1,
        }
    }

    /// Whether a single retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, SubGenError>;
