//! Cached view of a loaded schema catalog

use std::sync::Arc;

use apache_avro::Schema;
use parking_lot::RwLock;
use tracing::info;

use crate::catalog::{SchemaCatalog, SchemaSet};
use crate::error::{Error, Result};

/// Subject lookups over the most recent catalog load.
///
/// Readers work on an `Arc<SchemaSet>` snapshot. `refresh` loads a new set
/// without holding the lock and swaps it in whole.
#[derive(Debug)]
pub struct SchemaStore {
    catalog: SchemaCatalog,
    current: RwLock<Arc<SchemaSet>>,
}

impl SchemaStore {
    /// Load the catalog once and cache the result
    pub fn open(catalog: SchemaCatalog) -> Result<Self> {
        let set = catalog.load()?;
        info!(subjects = set.len(), "schema store opened");
        Ok(Self {
            catalog,
            current: RwLock::new(Arc::new(set)),
        })
    }

    /// Wrap an already loaded set
    pub fn with_set(catalog: SchemaCatalog, set: SchemaSet) -> Self {
        Self {
            catalog,
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// The current set. Stays valid across refreshes.
    pub fn snapshot(&self) -> Arc<SchemaSet> {
        Arc::clone(&self.current.read())
    }

    pub fn has(&self, subject: &str) -> bool {
        self.current.read().contains(subject)
    }

    /// Schema for a subject
    pub fn get(&self, subject: &str) -> Result<Arc<Schema>> {
        self.current
            .read()
            .get(subject)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                subject: subject.to_string(),
            })
    }

    /// Subjects referenced by a subject's document
    pub fn references(&self, subject: &str) -> Vec<String> {
        self.current.read().references(subject).to_vec()
    }

    /// Fully-qualified name of a subject's top-level type
    pub fn full_name(&self, subject: &str) -> Option<String> {
        self.current.read().full_name(subject).map(str::to_string)
    }

    /// All subjects, sorted
    pub fn subjects(&self) -> Vec<String> {
        self.current
            .read()
            .subjects()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Every subject with its schema
    pub fn all(&self) -> Vec<(String, Arc<Schema>)> {
        let set = self.snapshot();
        set.subjects()
            .into_iter()
            .filter_map(|subject| {
                set.get(subject)
                    .map(|schema| (subject.to_string(), Arc::clone(schema)))
            })
            .collect()
    }

    /// Reload the catalog. On failure the previous set stays in place.
    pub fn refresh(&self) -> Result<()> {
        let set = self.catalog.load()?;
        let subjects = set.len();
        *self.current.write() = Arc::new(set);
        info!(subjects, "schema store refreshed");
        Ok(())
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PING: &str = r#"{"type":"record","name":"Ping","namespace":"acme","fields":[{"name":"id","type":"string"}]}"#;

    #[test]
    fn test_lookups() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme")).unwrap();
        fs::write(dir.path().join("acme/ping.avsc"), PING).unwrap();

        let store = SchemaStore::open(SchemaCatalog::new([dir.path()])).unwrap();

        assert!(store.has("acme.ping"));
        assert!(store.has("acme.Ping"));
        assert_eq!(store.full_name("acme.ping").as_deref(), Some("acme.Ping"));
        assert!(store.references("acme.ping").is_empty());
        assert_eq!(store.all().len(), 2);

        match store.get("acme.pong") {
            Err(Error::NotFound { subject }) => assert_eq!(subject, "acme.pong"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_refresh_swaps_and_failed_refresh_keeps_old_set() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme")).unwrap();
        fs::write(dir.path().join("acme/ping.avsc"), PING).unwrap();

        let store = SchemaStore::open(SchemaCatalog::new([dir.path()])).unwrap();
        let before = store.snapshot();

        fs::write(
            dir.path().join("acme/pong.avsc"),
            r#"{"type":"record","name":"Pong","namespace":"acme","fields":[]}"#,
        )
        .unwrap();
        store.refresh().unwrap();
        assert!(store.has("acme.pong"));
        assert!(!before.contains("acme.pong"));

        fs::write(dir.path().join("acme/broken.avsc"), "{ nope").unwrap();
        assert!(store.refresh().is_err());
        assert!(store.has("acme.pong"));
        assert_eq!(store.subjects().len(), 4);
    }
}
