//! Schema Registry
//!
//! The gateway to the remote registry that assigns ids and versions to
//! `(subject, schema)` pairs, plus an in-process registry and a caching
//! decorator.

use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::Schema;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::checksum::Checksum;

/// Registry-wide schema id
pub type SchemaId = u32;

/// Per-subject schema version, starting at 1
pub type SchemaVersion = u32;

/// A schema this registration depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaReference {
    /// Fully-qualified name the referencing schema uses
    pub name: String,
    pub subject: String,
    pub version: SchemaVersion,
}

/// Errors reported by a registry gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Subject \"{subject}\" not found in the schema registry")]
    SubjectNotFound { subject: String },

    #[error("Schema not found for subject \"{subject}\"")]
    SchemaNotFound { subject: String },

    #[error("Schema registration failed for subject \"{subject}\": {message}")]
    Registration { subject: String, message: String },

    #[error("Schema registry transport error: {0}")]
    Transport(String),
}

/// Access to a schema registry.
///
/// Calls block until the registry answers. Timeouts and retries belong to
/// the implementation.
pub trait RegistryGateway: Send + Sync {
    /// Register a schema under a subject and return its id
    fn register(
        &self,
        subject: &str,
        schema: &Schema,
        references: &[SchemaReference],
    ) -> Result<SchemaId, RegistryError>;

    /// Id of an already registered schema.
    ///
    /// Fails with `SubjectNotFound` when the subject is unknown and with
    /// `SchemaNotFound` when the subject exists with other schemas only.
    fn schema_id(&self, subject: &str, schema: &Schema) -> Result<SchemaId, RegistryError>;

    /// Version of an already registered schema within its subject
    fn schema_version(
        &self,
        subject: &str,
        schema: &Schema,
    ) -> Result<SchemaVersion, RegistryError>;
}

impl<T: RegistryGateway + ?Sized> RegistryGateway for Arc<T> {
    fn register(
        &self,
        subject: &str,
        schema: &Schema,
        references: &[SchemaReference],
    ) -> Result<SchemaId, RegistryError> {
        (**self).register(subject, schema, references)
    }

    fn schema_id(&self, subject: &str, schema: &Schema) -> Result<SchemaId, RegistryError> {
        (**self).schema_id(subject, schema)
    }

    fn schema_version(
        &self,
        subject: &str,
        schema: &Schema,
    ) -> Result<SchemaVersion, RegistryError> {
        (**self).schema_version(subject, schema)
    }
}

#[derive(Debug, Clone)]
struct RegisteredSchema {
    checksum: Checksum,
    id: SchemaId,
    version: SchemaVersion,
    references: Vec<SchemaReference>,
}

#[derive(Debug, Default)]
struct RegistryState {
    subjects: HashMap<String, Vec<RegisteredSchema>>,
    ids: HashMap<Checksum, SchemaId>,
    next_id: SchemaId,
}

impl RegistryState {
    fn lookup(&self, subject: &str, schema: &Schema) -> Result<&RegisteredSchema, RegistryError> {
        let versions = self
            .subjects
            .get(subject)
            .ok_or_else(|| RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            })?;
        let checksum = Checksum::of_schema(schema);
        versions
            .iter()
            .find(|r| r.checksum == checksum)
            .ok_or_else(|| RegistryError::SchemaNotFound {
                subject: subject.to_string(),
            })
    }
}

/// Registry kept in process memory.
///
/// Schemas are compared by their canonical form. An identical schema gets the
/// same id under every subject, and registering it again is a no-op.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subjects known to the registry, sorted
    pub fn subjects(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut subjects: Vec<String> = state.subjects.keys().cloned().collect();
        subjects.sort_unstable();
        subjects
    }

    /// Number of versions registered under a subject
    pub fn version_count(&self, subject: &str) -> usize {
        self.state
            .lock()
            .subjects
            .get(subject)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// References a registered schema was registered with
    pub fn references(
        &self,
        subject: &str,
        schema: &Schema,
    ) -> Result<Vec<SchemaReference>, RegistryError> {
        let state = self.state.lock();
        state.lookup(subject, schema).map(|r| r.references.clone())
    }
}

impl RegistryGateway for InMemoryRegistry {
    fn register(
        &self,
        subject: &str,
        schema: &Schema,
        references: &[SchemaReference],
    ) -> Result<SchemaId, RegistryError> {
        let checksum = Checksum::of_schema(schema);
        let mut state = self.state.lock();

        if let Ok(existing) = state.lookup(subject, schema) {
            return Ok(existing.id);
        }

        let id = match state.ids.get(&checksum) {
            Some(id) => *id,
            None => {
                state.next_id += 1;
                let id = state.next_id;
                state.ids.insert(checksum.clone(), id);
                id
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        let version = versions.len() as SchemaVersion + 1;
        versions.push(RegisteredSchema {
            checksum,
            id,
            version,
            references: references.to_vec(),
        });

        info!(subject, id, version, "registered schema");
        Ok(id)
    }

    fn schema_id(&self, subject: &str, schema: &Schema) -> Result<SchemaId, RegistryError> {
        self.state.lock().lookup(subject, schema).map(|r| r.id)
    }

    fn schema_version(
        &self,
        subject: &str,
        schema: &Schema,
    ) -> Result<SchemaVersion, RegistryError> {
        self.state.lock().lookup(subject, schema).map(|r| r.version)
    }
}

type CacheKey = (String, Checksum);

/// Remembers successful lookups of another gateway.
///
/// Ids and versions of a `(subject, schema)` pair never change once assigned,
/// so they are cached for the lifetime of the decorator. Errors pass through
/// uncached.
#[derive(Debug)]
pub struct CachedRegistry<G> {
    inner: G,
    ids: DashMap<CacheKey, SchemaId>,
    versions: DashMap<CacheKey, SchemaVersion>,
}

impl<G: RegistryGateway> CachedRegistry<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            ids: DashMap::new(),
            versions: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn key(subject: &str, schema: &Schema) -> CacheKey {
        (subject.to_string(), Checksum::of_schema(schema))
    }
}

impl<G: RegistryGateway> RegistryGateway for CachedRegistry<G> {
    fn register(
        &self,
        subject: &str,
        schema: &Schema,
        references: &[SchemaReference],
    ) -> Result<SchemaId, RegistryError> {
        let id = self.inner.register(subject, schema, references)?;
        self.ids.insert(Self::key(subject, schema), id);
        Ok(id)
    }

    fn schema_id(&self, subject: &str, schema: &Schema) -> Result<SchemaId, RegistryError> {
        let key = Self::key(subject, schema);
        if let Some(id) = self.ids.get(&key) {
            debug!(subject, id = *id, "schema id cache hit");
            return Ok(*id);
        }
        let id = self.inner.schema_id(subject, schema)?;
        self.ids.insert(key, id);
        Ok(id)
    }

    fn schema_version(
        &self,
        subject: &str,
        schema: &Schema,
    ) -> Result<SchemaVersion, RegistryError> {
        let key = Self::key(subject, schema);
        if let Some(version) = self.versions.get(&key) {
            debug!(subject, version = *version, "schema version cache hit");
            return Ok(*version);
        }
        let version = self.inner.schema_version(subject, schema)?;
        self.versions.insert(key, version);
        Ok(version)
    }
}
