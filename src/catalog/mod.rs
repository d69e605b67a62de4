//! Schema Catalog
//!
//! Scans directories for Avro schema documents, derives the subjects each
//! document is published under, orders documents by their declared
//! references and parses them into one shared named-schema namespace.
//!
//! A load either produces a complete [`SchemaSet`] or fails; there is no
//! partially loaded catalog.

mod graph;
mod loader;
mod names;

pub use graph::ReferenceGraph;
pub use loader::{discover, SchemaFileEnumerator, WalkDirEnumerator};
pub use names::NamedSchemas;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use apache_avro::Schema;
use tracing::{debug, warn};

use crate::config::AvroEnvelopeConfig;
use crate::error::Result;
use crate::schema::DEFAULT_EXTENSION;

/// Everything a catalog load produces
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: HashMap<String, Arc<Schema>>,
    references: HashMap<String, Vec<String>>,
    full_names: HashMap<String, String>,
    load_order: Vec<String>,
    named: NamedSchemas,
}

impl SchemaSet {
    /// Subject -> schema. Aliases of one document share the same `Arc`.
    pub fn schemas(&self) -> &HashMap<String, Arc<Schema>> {
        &self.schemas
    }

    pub fn get(&self, subject: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(subject)
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.schemas.contains_key(subject)
    }

    /// Subjects referenced by a subject's document
    pub fn references(&self, subject: &str) -> &[String] {
        self.references
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Fully-qualified name of a subject's top-level type
    pub fn full_name(&self, subject: &str) -> Option<&str> {
        self.full_names.get(subject).map(String::as_str)
    }

    /// All subjects, sorted
    pub fn subjects(&self) -> Vec<&str> {
        let mut subjects: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        subjects.sort_unstable();
        subjects
    }

    /// Documents in the order they were parsed, named by their first subject
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    /// The shared named-schema namespace
    pub fn named(&self) -> &NamedSchemas {
        &self.named
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Loads schema documents from a set of directories
#[derive(Clone)]
pub struct SchemaCatalog {
    directories: Vec<PathBuf>,
    extension: String,
    enumerator: Arc<dyn SchemaFileEnumerator>,
}

impl fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("directories", &self.directories)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl SchemaCatalog {
    /// Create a catalog over the given directories
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
            extension: DEFAULT_EXTENSION.to_string(),
            enumerator: Arc::new(WalkDirEnumerator),
        }
    }

    /// Create a catalog from configuration
    pub fn from_config(config: &AvroEnvelopeConfig) -> Self {
        Self::new(config.schema_dirs.iter().cloned())
            .with_extension(config.schema_extension.clone())
    }

    /// Use a different document extension (without the leading dot)
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Use a custom file enumerator
    pub fn with_enumerator(mut self, enumerator: impl SchemaFileEnumerator + 'static) -> Self {
        self.enumerator = Arc::new(enumerator);
        self
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Scan, order and parse every schema document.
    pub fn load(&self) -> Result<SchemaSet> {
        let directories = loader::existing_directories(&self.directories);
        if directories.is_empty() {
            debug!(directories = ?self.directories, "no schema directories exist");
            return Ok(SchemaSet::default());
        }

        let files = self.enumerator.files(&directories, &self.extension)?;
        debug!(files = files.len(), "scanning schema documents");
        let descriptors = loader::read_descriptors(&files)?;

        let mut index: HashMap<String, usize> = HashMap::with_capacity(descriptors.len() * 3);
        for (position, descriptor) in descriptors.iter().enumerate() {
            for subject in &descriptor.subjects {
                if let Some(previous) = index.insert(subject.clone(), position) {
                    if previous != position {
                        warn!(
                            subject = %subject,
                            kept = %descriptor.path.display(),
                            dropped = %descriptors[previous].path.display(),
                            "subject is derived by more than one schema document"
                        );
                    }
                }
            }
        }

        let graph = ReferenceGraph::build(&descriptors, &index)?;
        let order = graph.load_order()?;

        let mut set = SchemaSet::default();
        for position in order {
            let descriptor = &descriptors[position];
            let owned: Vec<&String> = descriptor
                .subjects
                .iter()
                .filter(|subject| index.get(*subject) == Some(&position))
                .collect();
            if owned.is_empty() {
                debug!(
                    path = %descriptor.path.display(),
                    "schema document owns no subject; skipped"
                );
                continue;
            }

            let schema = set.named.parse_document(&descriptor.path, &descriptor.body)?;

            for subject in owned {
                set.schemas.insert(subject.clone(), Arc::clone(&schema));
                set.references
                    .insert(subject.clone(), descriptor.references.clone());
                if let Some(full_name) = &descriptor.full_name {
                    set.full_names.insert(subject.clone(), full_name.clone());
                }
            }
            set.load_order.push(descriptor.label().to_string());
        }

        debug!(
            subjects = set.schemas.len(),
            documents = set.load_order.len(),
            named_types = set.named.len(),
            "schema catalog loaded"
        );

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "acme/ping.avsc",
            r#"{"type":"record","name":"Ping","namespace":"acme","fields":[]}"#,
        );

        let catalog = SchemaCatalog::new([dir.path().join("nope"), dir.path().to_path_buf()]);
        let set = catalog.load().unwrap();

        assert_eq!(set.subjects(), vec!["acme.Ping", "acme.ping"]);
        assert!(Arc::ptr_eq(set.get("acme.Ping").unwrap(), set.get("acme.ping").unwrap()));
    }

    #[test]
    fn test_no_directories_is_empty() {
        let set = SchemaCatalog::new(Vec::<PathBuf>::new()).load().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_custom_extension() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "acme/ping.json",
            r#"{"type":"enum","name":"Ping","namespace":"acme","symbols":["A"]}"#,
        );
        write(
            dir.path(),
            "acme/pong.avsc",
            r#"{"type":"enum","name":"Pong","namespace":"acme","symbols":["B"]}"#,
        );

        let set = SchemaCatalog::new([dir.path()])
            .with_extension("json")
            .load()
            .unwrap();

        assert!(set.contains("acme.Ping"));
        assert!(!set.contains("acme.Pong"));
    }

    #[test]
    fn test_parse_error_aborts_load() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "acme/good.avsc",
            r#"{"type":"record","name":"Good","fields":[]}"#,
        );
        write(
            dir.path(),
            "acme/bad.avsc",
            r#"{"type":"record","name":"Bad","fields":[{"name":"x","type":"nope"}]}"#,
        );

        match SchemaCatalog::new([dir.path()]).load() {
            Err(Error::SchemaParse { path, .. }) => assert!(path.ends_with("acme/bad.avsc")),
            other => panic!("Expected SchemaParse, got {:?}", other),
        }
    }

    #[test]
    fn test_document_shadowed_by_a_later_one_is_not_parsed() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "a/acme/ping.avsc",
            r#"{"type":"record","name":"Ping","namespace":"acme","fields":[{"name":"x","type":"nope"}]}"#,
        );
        write(
            dir.path(),
            "b/acme/ping.avsc",
            r#"{"type":"record","name":"Ping","namespace":"acme","fields":[{"name":"y","type":"int"}]}"#,
        );

        let set = SchemaCatalog::new([dir.path().join("a"), dir.path().join("b")])
            .load()
            .unwrap();

        assert_eq!(set.load_order().len(), 1);
        assert!(set.load_order()[0].ends_with("ping"));
        match set.get("acme.ping").unwrap().as_ref() {
            Schema::Record(record) => assert_eq!(record.fields[0].name, "y"),
            other => panic!("Expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_references_and_full_names_are_kept() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "acme/address.avsc",
            r#"{"type":"record","name":"Address","namespace":"acme","fields":[{"name":"city","type":"string"}]}"#,
        );
        write(
            dir.path(),
            "acme/customer.avsc",
            r#"{"type":"record","name":"Customer","namespace":"acme","references":["acme.Address"],"fields":[{"name":"address","type":"Address"}]}"#,
        );

        let set = SchemaCatalog::new([dir.path()]).load().unwrap();

        assert_eq!(set.references("acme.customer"), ["acme.Address".to_string()]);
        assert!(set.references("acme.address").is_empty());
        assert_eq!(set.full_name("acme.customer"), Some("acme.Customer"));
        assert_eq!(set.load_order(), ["acme.address".to_string(), "acme.customer".to_string()]);
    }
}
