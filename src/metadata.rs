//! Message metadata resolution
//!
//! Metadata tells the envelope codec which subjects encode a message type and
//! which header provider decorates it. It comes from static configuration,
//! from a marker declared on the type, or from the nearest ancestor or
//! contract that has metadata.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::config::MessageConfig;
use crate::error::{Error, Result};
use crate::message::{AvroMessageMarker, TypeRegistry};

/// Service id of the envelope serializer metadata belongs to by default
pub const DEFAULT_SERVICE_ID: &str = "avro_envelope.serializer";

/// Envelope metadata for one message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub service_id: String,
    pub type_id: String,
    pub key_subject: Option<String>,
    pub value_subject: Option<String>,
    pub header_provider_id: Option<String>,
}

impl MessageMetadata {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            type_id: type_id.into(),
            key_subject: None,
            value_subject: None,
            header_provider_id: None,
        }
    }

    pub fn with_key_subject(mut self, subject: impl Into<String>) -> Self {
        self.key_subject = Some(subject.into());
        self
    }

    pub fn with_value_subject(mut self, subject: impl Into<String>) -> Self {
        self.value_subject = Some(subject.into());
        self
    }

    pub fn with_header_provider(mut self, id: impl Into<String>) -> Self {
        self.header_provider_id = Some(id.into());
        self
    }

    /// Messages without a value subject are always tombstones
    pub fn allows_tombstone(&self) -> bool {
        self.value_subject.is_none()
    }

    fn from_marker(type_id: &str, marker: &AvroMessageMarker) -> Self {
        let owned = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            type_id: type_id.to_string(),
            key_subject: owned(marker.key_subject),
            value_subject: owned(marker.value_subject),
            header_provider_id: owned(marker.header_provider),
        }
    }

    /// Normalize a configured entry. Empty strings count as unset.
    pub fn from_config(config: &MessageConfig) -> Result<Self> {
        if config.type_id.trim().is_empty() {
            return Err(Error::Config(
                "message metadata requires a non-empty type".to_string(),
            ));
        }
        let owned = |s: &Option<String>| s.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        Ok(Self {
            service_id: owned(&config.service_id).unwrap_or_else(|| DEFAULT_SERVICE_ID.to_string()),
            type_id: config.type_id.clone(),
            key_subject: owned(&config.key_subject),
            value_subject: owned(&config.value_subject),
            header_provider_id: owned(&config.header_provider),
        })
    }
}

/// Resolves metadata per type id.
///
/// Configured and marker metadata are remembered once resolved. A type's
/// marker is inspected at most once, whether or not it has one. Concurrent
/// resolution of the same type may do the work twice; the result is the same.
#[derive(Debug)]
pub struct MessageMetadataCatalog {
    resolved: DashMap<String, MessageMetadata>,
    inspected: DashSet<String>,
    types: Arc<TypeRegistry>,
}

impl MessageMetadataCatalog {
    pub fn new(
        configured: impl IntoIterator<Item = MessageMetadata>,
        types: Arc<TypeRegistry>,
    ) -> Self {
        let resolved = DashMap::new();
        for metadata in configured {
            resolved.insert(metadata.type_id.clone(), metadata);
        }
        Self {
            resolved,
            inspected: DashSet::new(),
            types,
        }
    }

    /// Build from configured message entries
    pub fn from_config(messages: &[MessageConfig], types: Arc<TypeRegistry>) -> Result<Self> {
        let configured = messages
            .iter()
            .map(MessageMetadata::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(configured, types))
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Metadata for a type id, or `None` when nothing in its hierarchy has any.
    ///
    /// Fails with `Logic` when a marker is declared on a type that does not
    /// satisfy the message contract.
    pub fn get(&self, type_id: &str) -> Result<Option<MessageMetadata>> {
        let mut visited = HashSet::new();
        self.resolve(type_id, &mut visited)
    }

    fn resolve(
        &self,
        type_id: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Option<MessageMetadata>> {
        if !visited.insert(type_id.to_string()) {
            return Ok(None);
        }

        if let Some(metadata) = self.resolved.get(type_id) {
            return Ok(Some(metadata.value().clone()));
        }

        if let Some(metadata) = self.from_marker(type_id)? {
            self.resolved.insert(type_id.to_string(), metadata.clone());
            return Ok(Some(metadata));
        }

        for ancestor in self.types.inherits_from(type_id) {
            if let Some(metadata) = self.resolve(ancestor, visited)? {
                debug!(type_id, from = %ancestor, "metadata inherited");
                return Ok(Some(metadata));
            }
        }

        Ok(None)
    }

    fn from_marker(&self, type_id: &str) -> Result<Option<MessageMetadata>> {
        let Some(definition) = self.types.get(type_id) else {
            return Ok(None);
        };
        if self.inspected.contains(type_id) {
            return Ok(None);
        }

        let Some(marker) = definition.marker() else {
            self.inspected.insert(type_id.to_string());
            return Ok(None);
        };

        if !definition.is_message_capable() {
            return Err(Error::logic(format!(
                "Type \"{}\" must implement the Avro message contract to declare Avro message metadata.",
                type_id
            )));
        }

        self.inspected.insert(type_id.to_string());
        Ok(Some(MessageMetadata::from_marker(type_id, marker)))
    }

    /// Every metadata entry resolved so far, sorted by type id
    pub fn all(&self) -> Vec<MessageMetadata> {
        let mut all: Vec<MessageMetadata> =
            self.resolved.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.type_id.cmp(&b.type_id));
        all
    }

    /// Configured or resolved metadata keyed by type id
    pub fn snapshot(&self) -> HashMap<String, MessageMetadata> {
        self.resolved
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
