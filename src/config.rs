//! Configuration management for Avro envelopes
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (avro-envelope.toml)
//! - Environment variables (AVRO_ENVELOPE__*)
//!
//! ## Example config file (avro-envelope.toml):
//! ```toml
//! schema_dirs = ["config/avro"]
//! schema_extension = "avsc"
//!
//! [schema_registry]
//! register_missing_schemas = false
//! register_missing_subjects = false
//!
//! [[messages]]
//! type = "acme.Configured"
//! key_subject = "Tests.ConfiguredKey"
//! value_subject = "Tests.ConfiguredValue"
//! header_provider = "test.headers"
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::RegistrationPolicy;
use crate::error::Result;
use crate::schema::DEFAULT_EXTENSION;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvroEnvelopeConfig {
    /// Directories scanned for schema documents
    #[serde(default = "default_schema_dirs")]
    pub schema_dirs: Vec<PathBuf>,

    /// Extension of schema documents, without the dot
    #[serde(default = "default_extension")]
    pub schema_extension: String,

    /// Registration behavior against the schema registry
    #[serde(default)]
    pub schema_registry: RegistryConfig,

    /// Statically configured message types
    #[serde(default)]
    pub messages: Vec<MessageConfig>,
}

/// Schema registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Register a new schema version when a known subject lacks the schema
    #[serde(default)]
    pub register_missing_schemas: bool,

    /// Register subjects the registry does not know yet
    #[serde(default)]
    pub register_missing_subjects: bool,
}

/// Metadata for one message type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Type id of the message
    #[serde(rename = "type")]
    pub type_id: String,

    /// Serializer service the metadata belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_subject: Option<String>,

    /// Without a value subject every message of this type is a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_subject: Option<String>,

    /// Service id of the header provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_provider: Option<String>,
}

// Default value functions
fn default_schema_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("config/avro")]
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl Default for AvroEnvelopeConfig {
    fn default() -> Self {
        Self {
            schema_dirs: default_schema_dirs(),
            schema_extension: default_extension(),
            schema_registry: RegistryConfig::default(),
            messages: Vec::new(),
        }
    }
}

impl AvroEnvelopeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "avro-envelope.toml",
            ".avro-envelope.toml",
            "config/avro-envelope.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) =
            directories::ProjectDirs::from("dev", "chargecloud", "avro-envelope")
        {
            let xdg_config = config_dir.config_dir().join("avro-envelope.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (AVRO_ENVELOPE__*)
        builder = builder.add_source(
            Environment::with_prefix("AVRO_ENVELOPE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Schema directories with relative paths resolved against the working directory
    pub fn resolved_schema_dirs(&self) -> Vec<PathBuf> {
        self.schema_dirs
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    std::env::current_dir().unwrap_or_default().join(p)
                }
            })
            .collect()
    }

    /// Registration policy for the record codec
    pub fn policy(&self) -> RegistrationPolicy {
        RegistrationPolicy {
            register_missing_schemas: self.schema_registry.register_missing_schemas,
            register_missing_subjects: self.schema_registry.register_missing_subjects,
        }
    }
}
