//! Error hierarchy for wbalrs
//!
//! The balance engine itself never fails: degenerate inputs are absorbed by
//! policy. These errors belong to the layers around it (configuration files,
//! sample import, the engine task channel).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum WbalError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sample import errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine task is gone
    #[error("Engine channel closed: {0}")]
    Channel(String),
}

/// Configuration file and value errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Config could not be serialized
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is outside its domain
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Power sample import errors
#[derive(Debug, Error)]
pub enum ImportError {
    /// CSV reader failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Required column is absent from the header
    #[error("Missing required column: {column}")]
    MissingColumn { column: String },

    /// A row could not be interpreted
    #[error("Invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
}

/// Result type alias for wbalrs operations
pub type Result<T> = std::result::Result<T, WbalError>;

impl WbalError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WbalError::Import(ImportError::InvalidRow { .. }) => ErrorSeverity::Warning,
            WbalError::Config(ConfigError::InvalidValue { .. }) => ErrorSeverity::Warning,
            WbalError::Channel(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            WbalError::Import(ImportError::MissingColumn { column }) => {
                format!("The ride file has no '{}' column.", column)
            }
            WbalError::Config(ConfigError::Parse { path, .. }) => {
                format!("Could not read configuration file {}.", path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Engine task lost
    Critical,
    /// Operation failed
    Error,
    /// Bad input that can be skipped or corrected
    Warning,
}

impl ErrorSeverity {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical | ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
