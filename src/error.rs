//! Error types for the schema catalog and the envelope codecs

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::RegistryError;

/// Result type for catalog and codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong while turning a schema document into an Avro schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentErrorKind {
    /// The document is not valid JSON
    InvalidJson,
    /// The document is valid JSON but not an object
    UnexpectedStructure,
    /// Avro rejected the schema definition
    Avro,
}

impl fmt::Display for DocumentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson => write!(f, "invalid JSON"),
            Self::UnexpectedStructure => write!(f, "unexpected JSON structure"),
            Self::Avro => write!(f, "invalid Avro schema"),
        }
    }
}

/// Catalog, registry and envelope errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to parse Avro schema \"{}\" ({kind}): {message}", path.display())]
    SchemaParse {
        path: PathBuf,
        kind: DocumentErrorKind,
        message: String,
    },

    #[error("Invalid references in Avro schema \"{}\": {message}", path.display())]
    ReferenceDeclaration { path: PathBuf, message: String },

    #[error("Schema subject \"{subject}\" references unknown subject \"{reference}\"")]
    UnknownReference { subject: String, reference: String },

    #[error("Circular schema reference detected: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Avro schema for subject \"{subject}\" could not be found")]
    NotFound { subject: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Logic(String),

    #[error("Message decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Decoded Avro payload for subject \"{subject}\" is not a record structure")]
    DecodeStructure { subject: String },

    #[error("Avro serialization failed for subject \"{subject}\": {message}")]
    Serialization { subject: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn schema_parse(
        path: impl Into<PathBuf>,
        kind: DocumentErrorKind,
        message: impl fmt::Display,
    ) -> Self {
        Self::SchemaParse {
            path: path.into(),
            kind,
            message: message.to_string(),
        }
    }

    pub(crate) fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    pub(crate) fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed(message.into())
    }
}

impl From<config_crate::ConfigError> for Error {
    fn from(err: config_crate::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
