//! Schema documents and the subjects they are published under

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{DocumentErrorKind, Error, Result};

/// File extension of Avro schema documents
pub const DEFAULT_EXTENSION: &str = "avsc";

/// A schema document read from disk, before it is parsed by Avro.
///
/// Descriptors only live for the duration of a catalog load. The catalog keeps
/// `references` and `full_name` per subject and discards the rest once the
/// document has been parsed.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    /// Path of the document on disk
    pub path: PathBuf,
    /// The JSON definition with the `references` list removed
    pub body: Value,
    /// Subjects this document depends on, in declaration order
    pub references: Vec<String>,
    /// Every subject the parsed schema is published under
    pub subjects: Vec<String>,
    /// `namespace.name` of the top-level type, if it is a named type
    pub full_name: Option<String>,
}

impl SchemaDescriptor {
    /// Read a document from disk. Returns `None` for empty documents.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let contents = fs::read_to_string(path)?;
        Self::parse(path, &contents)
    }

    /// Build a descriptor from document contents. Returns `None` for empty documents.
    pub fn parse(path: &Path, contents: &str) -> Result<Option<Self>> {
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let json: Value = serde_json::from_str(contents)
            .map_err(|e| Error::schema_parse(path, DocumentErrorKind::InvalidJson, e))?;

        let Value::Object(mut object) = json else {
            return Err(Error::schema_parse(
                path,
                DocumentErrorKind::UnexpectedStructure,
                "the top-level value must be an object",
            ));
        };

        let references = take_references(path, &mut object)?;
        let full_name = full_name_of(&object);
        let subjects = derive_subjects(path, &object);

        Ok(Some(Self {
            path: path.to_path_buf(),
            body: Value::Object(object),
            references,
            subjects,
            full_name,
        }))
    }

    /// The subject used to name this document in diagnostics
    pub fn label(&self) -> &str {
        self.subjects
            .first()
            .map(String::as_str)
            .unwrap_or_else(|| self.path.to_str().unwrap_or_default())
    }
}

/// Remove the `references` list from a document and validate it.
fn take_references(path: &Path, object: &mut Map<String, Value>) -> Result<Vec<String>> {
    let Some(raw) = object.remove("references") else {
        return Ok(Vec::new());
    };

    let Value::Array(entries) = raw else {
        return Err(Error::ReferenceDeclaration {
            path: path.to_path_buf(),
            message: "\"references\" must be a list of subject names".to_string(),
        });
    };

    let mut references: Vec<String> = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        match entry {
            Value::String(subject) if !subject.is_empty() => {
                if !references.contains(&subject) {
                    references.push(subject);
                }
            }
            other => {
                return Err(Error::ReferenceDeclaration {
                    path: path.to_path_buf(),
                    message: format!(
                        "entry {} must be a non-empty subject name, got {}",
                        position, other
                    ),
                });
            }
        }
    }

    Ok(references)
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Fully-qualified name of a top-level named type.
///
/// A dotted `name` is already fully qualified and wins over `namespace`.
pub fn full_name_of(object: &Map<String, Value>) -> Option<String> {
    let name = non_empty_str(object, "name")?;
    if name.contains('.') {
        return Some(name.to_string());
    }
    match non_empty_str(object, "namespace") {
        Some(namespace) => Some(format!("{}.{}", namespace, name)),
        None => Some(name.to_string()),
    }
}

/// Derive every subject a document is published under.
///
/// Combines the explicit `subject` field, the directory convention
/// (`<namespace>.<directory>.<basename>`, where the directory is dropped when
/// the namespace already ends with it) and the fully-qualified name.
pub fn derive_subjects(path: &Path, object: &Map<String, Value>) -> Vec<String> {
    let mut subjects = Vec::new();
    let namespace = non_empty_str(object, "namespace");

    if let Some(subject) = non_empty_str(object, "subject") {
        subjects.push(subject.to_string());
    }

    if let Some(subject) = directory_subject(path, namespace) {
        subjects.push(subject);
    }

    if let Some(name) = non_empty_str(object, "name") {
        if name.contains('.') {
            subjects.push(name.to_string());
        } else if let Some(namespace) = namespace {
            subjects.push(format!("{}.{}", namespace, name));
        }
    }

    let mut unique: Vec<String> = Vec::with_capacity(subjects.len());
    for subject in subjects {
        if !subject.is_empty() && !unique.contains(&subject) {
            unique.push(subject);
        }
    }
    unique
}

fn directory_subject(path: &Path, namespace: Option<&str>) -> Option<String> {
    let basename = path.file_stem()?.to_str()?;
    if basename.is_empty() {
        return None;
    }

    let segment = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty());

    let prefix = match (namespace, segment) {
        (Some(namespace), Some(segment)) => {
            if namespace == segment || namespace.ends_with(&format!(".{}", segment)) {
                namespace.to_string()
            } else {
                format!("{}.{}", namespace, segment)
            }
        }
        (Some(namespace), None) => namespace.to_string(),
        (None, Some(segment)) => segment.to_string(),
        (None, None) => return Some(basename.to_string()),
    };

    Some(format!("{}.{}", prefix, basename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, contents: &str) -> Result<Option<SchemaDescriptor>> {
        SchemaDescriptor::parse(Path::new(path), contents)
    }

    #[test]
    fn test_subject_from_directory_and_namespace() {
        let descriptor = parse(
            "schemas/ocpi/queue/session/position-updated-key.avsc",
            r#"{"type":"record","name":"PositionUpdatedKey","namespace":"ocpi.queue.session","fields":[]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            descriptor.subjects,
            vec![
                "ocpi.queue.session.position-updated-key".to_string(),
                "ocpi.queue.session.PositionUpdatedKey".to_string(),
            ]
        );
        assert_eq!(
            descriptor.full_name.as_deref(),
            Some("ocpi.queue.session.PositionUpdatedKey")
        );
    }

    #[test]
    fn test_directory_prefixed_by_namespace() {
        let descriptor = parse(
            "schemas/billing/invoice.avsc",
            r#"{"type":"record","name":"Invoice","namespace":"acme","fields":[]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(descriptor.subjects[0], "acme.billing.invoice");
    }

    #[test]
    fn test_explicit_subject_comes_first() {
        let descriptor = parse(
            "schemas/tests/configured-key.avsc",
            r#"{"type":"record","name":"ConfiguredKey","subject":"Tests.ConfiguredKey","fields":[]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            descriptor.subjects,
            vec!["Tests.ConfiguredKey".to_string(), "tests.configured-key".to_string()]
        );
        assert_eq!(descriptor.full_name.as_deref(), Some("ConfiguredKey"));
    }

    #[test]
    fn test_references_are_stripped_and_deduplicated() {
        let descriptor = parse(
            "schemas/acme/order.avsc",
            r#"{"type":"record","name":"Order","namespace":"acme","references":["acme.Address","acme.Address","acme.Item"],"fields":[]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(descriptor.references, vec!["acme.Address", "acme.Item"]);
        assert!(descriptor.body.get("references").is_none());
    }

    #[test]
    fn test_invalid_reference_entries() {
        let not_a_list = parse("a/b.avsc", r#"{"type":"record","name":"B","references":"x","fields":[]}"#);
        assert!(matches!(not_a_list, Err(Error::ReferenceDeclaration { .. })));

        let empty = parse("a/b.avsc", r#"{"type":"record","name":"B","references":[""],"fields":[]}"#);
        assert!(matches!(empty, Err(Error::ReferenceDeclaration { .. })));

        let number = parse("a/b.avsc", r#"{"type":"record","name":"B","references":[1],"fields":[]}"#);
        assert!(matches!(number, Err(Error::ReferenceDeclaration { .. })));
    }

    #[test]
    fn test_malformed_documents() {
        match parse("a/broken.avsc", "{ not json") {
            Err(Error::SchemaParse { path, kind, .. }) => {
                assert_eq!(path, PathBuf::from("a/broken.avsc"));
                assert_eq!(kind, DocumentErrorKind::InvalidJson);
            }
            other => panic!("Expected SchemaParse, got {:?}", other),
        }

        match parse("a/list.avsc", r#"["null","string"]"#) {
            Err(Error::SchemaParse { kind, .. }) => {
                assert_eq!(kind, DocumentErrorKind::UnexpectedStructure)
            }
            other => panic!("Expected SchemaParse, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_document_is_skipped() {
        assert!(parse("a/empty.avsc", "  \n").unwrap().is_none());
    }
}
