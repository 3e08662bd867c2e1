use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrganizerError {
    // Cache database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to transfer {count} files:\n{0}", count = .0.len())]
    TransferFailed(TransferFailures),

    // Filesystem errors
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Destination {path} is not usable: {reason}")]
    DestinationUnavailable { path: PathBuf, reason: String },

    // Metadata errors
    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PNG error: {0}")]
    Png(#[from] png::DecodingError),

    #[error("External tool error: {0}")]
    ExternalTool(String),

    #[error("External tool {program} timed out after {seconds}s")]
    ToolTimeout { program: String, seconds: u64 },

    #[error("Failed to extract metadata from {path}: {reason}")]
    MetadataExtraction { path: PathBuf, reason: String },

    // Serialization and network
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoding error: {0}")]
    Geocoding(String),

    // Configuration
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidConfigValue { key: String, value: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Details about files that failed to copy or move.
#[derive(Debug)]
pub struct TransferFailures {
    pub failures: Vec<TransferFailure>,
}

#[derive(Debug)]
pub struct TransferFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: String,
}

impl std::fmt::Display for TransferFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for failure in &self.failures {
            writeln!(
                f,
                "  {} -> {}: {}",
                failure.source.display(),
                failure.destination.display(),
                failure.error
            )?;
        }
        Ok(())
    }
}

impl TransferFailures {
    pub fn new() -> Self {
        Self { failures: Vec::new() }
    }

    pub fn add(&mut self, source: PathBuf, destination: PathBuf, error: impl ToString) {
        self.failures.push(TransferFailure {
            source,
            destination,
            error: error.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl Default for TransferFailures {
    fn default() -> Self {
        Self::new()
    }
}

/// Result type for organizer operations.
pub type Result<T> = std::result::Result<T, OrganizerError>;
