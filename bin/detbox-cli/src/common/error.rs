use detbox::{ClassLoadingError, ConfigurationError, SourceScanError};

/// Error types for the detbox commands
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Failed to read a file
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Invalid execution profile
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Invalid sandbox configuration
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A class failed to load
    #[error("{0}")]
    Load(#[from] ClassLoadingError),

    /// A class source could not be enumerated
    #[error("{0}")]
    SourceScan(#[from] SourceScanError),

    /// Failed to encode output
    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    /// Sandboxed execution did not complete
    #[error("Sandboxed execution failed: {0}")]
    ExecutionFailed(&'static str),

    /// Some classes were rejected
    #[error("{0} class(es) rejected")]
    Rejected(usize),
}

/// Result type for the detbox commands
pub type Result<T> = std::result::Result<T, CliError>;
