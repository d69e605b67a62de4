//! Schema fingerprints used to compare schemas by content

use std::fmt;

use apache_avro::Schema;
use sha2::{Digest, Sha256};

/// SHA256 fingerprint of an Avro schema's parsing canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from schema text
    pub fn of_text(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Compute checksum of a parsed schema.
    ///
    /// Two schemas that differ only in formatting, documentation or field
    /// attribute order share a checksum.
    pub fn of_schema(schema: &Schema) -> Self {
        Self::of_text(&schema.canonical_form())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_ignores_formatting() {
        let compact = Schema::parse_str(
            r#"{"type":"record","name":"Ping","fields":[{"name":"id","type":"string"}]}"#,
        )
        .unwrap();
        let spaced = Schema::parse_str(
            r#"{
                "type": "record",
                "name": "Ping",
                "doc": "heartbeat",
                "fields": [ { "name": "id", "type": "string" } ]
            }"#,
        )
        .unwrap();

        assert_eq!(Checksum::of_schema(&compact), Checksum::of_schema(&spaced));
    }

    #[test]
    fn test_checksum_different_schemas() {
        let a = Schema::parse_str(r#"{"type":"record","name":"A","fields":[]}"#).unwrap();
        let b = Schema::parse_str(r#"{"type":"record","name":"B","fields":[]}"#).unwrap();
        assert_ne!(Checksum::of_schema(&a), Checksum::of_schema(&b));
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        let checksum = Checksum::of_text("x");
        assert_eq!(checksum.as_str().len(), 64);
        assert!(checksum.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
