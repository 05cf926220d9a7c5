use std::io;
use thiserror::Error;

/// Result type for caplet operations
pub type Result<T> = std::result::Result<T, CapletError>;

/// Unified error type for all caplet operations
#[derive(Debug, Error)]
pub enum CapletError {
    // Build errors
    #[error("Build failed: {0}")]
    Build(String),

    #[error("Plan entry '{0}' collides with the reserved metadata directory")]
    ReservedNameCollision(String),

    // Launch errors
    #[error("Cannot locate the running archive: {0}")]
    SelfLocation(String),

    #[error("Manifest index not found in archive")]
    ManifestNotFound,

    #[error("Archive manifest declares no entry unit")]
    MissingEntryUnit,

    // Resolution errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a mountable archive: {0}")]
    NotAnArchive(String),

    #[error("Empty locator cannot be resolved")]
    EmptyLocator,

    // Code loading errors
    #[error("Entry point '{operation}' not found in unit '{unit}'")]
    EntryPointNotFound { unit: String, operation: String },

    #[error("Entry point '{operation}' in unit '{unit}' has an incompatible signature: {detail}")]
    InvalidEntryPointSignature {
        unit: String,
        operation: String,
        detail: String,
    },

    #[error("Invalid unit definition for '{unit}': {detail}")]
    InvalidUnitDefinition { unit: String, detail: String },

    // Pass-through for failures raised by an invoked entry operation;
    // the launch sequencer never wraps or swallows these.
    #[error(transparent)]
    Application(Box<dyn std::error::Error + Send + Sync>),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
