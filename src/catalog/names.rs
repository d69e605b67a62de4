//! Shared named-schema namespace
//!
//! Documents are parsed one after another in reference order. Every named type
//! (record, error, enum, fixed) a document declares is registered here, and
//! later documents that mention the type by name get the registered definition
//! instead of parsing their own copy.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use apache_avro::Schema;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{DocumentErrorKind, Error, Result};

const PRIMITIVES: [&str; 8] = [
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

#[derive(Debug, Clone)]
struct NamedSchema {
    /// Self-contained JSON definition that can be inlined into any document
    definition: Value,
    schema: Arc<Schema>,
}

/// Named Avro types keyed by fully-qualified name
#[derive(Debug, Clone, Default)]
pub struct NamedSchemas {
    entries: HashMap<String, NamedSchema>,
}

/// A named definition a document declares itself
struct OwnDefinition {
    full_name: String,
    definition: Map<String, Value>,
    namespace: Option<String>,
    is_root: bool,
}

/// State of one expansion pass over a document
struct Expansion<'a> {
    names: &'a NamedSchemas,
    defined: HashSet<String>,
    own: Vec<OwnDefinition>,
    collect: bool,
}

impl NamedSchemas {
    /// Look up a named type by fully-qualified name
    pub fn get(&self, full_name: &str) -> Option<&Arc<Schema>> {
        self.entries.get(full_name).map(|n| &n.schema)
    }

    /// Check whether a named type is registered
    pub fn contains(&self, full_name: &str) -> bool {
        self.entries.contains_key(full_name)
    }

    /// All registered fully-qualified names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a document body against the namespace and register the named
    /// types it declares.
    ///
    /// When the document's top-level type is named, the returned schema is the
    /// same `Arc` that gets registered under that name.
    pub(crate) fn parse_document(&mut self, path: &Path, body: &Value) -> Result<Arc<Schema>> {
        let mut expansion = Expansion::new(self, true);
        let expanded = expansion.expand(body, None, false, true);
        let own = expansion.own;

        let schema = Arc::new(parse_avro(path, &expanded)?);

        for definition in own {
            let (standalone, parsed) = if definition.is_root {
                (expanded.clone(), Arc::clone(&schema))
            } else {
                let qualified =
                    qualify_definition(definition.definition, definition.namespace.as_deref());
                let mut standalone_pass = Expansion::new(self, false);
                let standalone = standalone_pass.expand(&qualified, None, false, false);
                let parsed = Arc::new(parse_avro(path, &standalone)?);
                (standalone, parsed)
            };

            self.entries.insert(
                definition.full_name,
                NamedSchema {
                    definition: standalone,
                    schema: parsed,
                },
            );
        }

        Ok(schema)
    }
}

impl<'a> Expansion<'a> {
    fn new(names: &'a NamedSchemas, collect: bool) -> Self {
        Self {
            names,
            defined: HashSet::new(),
            own: Vec::new(),
            collect,
        }
    }

    /// Rewrite a schema so that every named type it mentions is either defined
    /// inline exactly once or refers to an earlier definition.
    fn expand(
        &mut self,
        value: &Value,
        namespace: Option<&str>,
        inlining: bool,
        is_root: bool,
    ) -> Value {
        match value {
            Value::String(name) => self.expand_name(name, namespace),
            Value::Array(branches) => Value::Array(
                branches
                    .iter()
                    .map(|branch| self.expand(branch, namespace, inlining, false))
                    .collect(),
            ),
            Value::Object(object) => self.expand_object(object, namespace, inlining, is_root),
            other => other.clone(),
        }
    }

    fn expand_name(&mut self, name: &str, namespace: Option<&str>) -> Value {
        if PRIMITIVES.contains(&name) {
            return Value::String(name.to_string());
        }

        let full_name = qualify(name, namespace);
        if self.defined.contains(&full_name) {
            return Value::String(full_name);
        }
        if self.defined.contains(name) {
            return Value::String(name.to_string());
        }

        let names = self.names;
        match names.entries.get(&full_name).or_else(|| names.entries.get(name)) {
            Some(named) => self.expand(&named.definition, None, true, false),
            // Left for Avro to reject as an unknown type
            None => Value::String(name.to_string()),
        }
    }

    fn expand_object(
        &mut self,
        object: &Map<String, Value>,
        namespace: Option<&str>,
        inlining: bool,
        is_root: bool,
    ) -> Value {
        let kind = object.get("type");
        if let Some("record" | "error" | "enum" | "fixed") = kind.and_then(Value::as_str) {
            // A definition reached twice, e.g. through both sides of a diamond
            if let Some(full_name) = definition_full_name(object, namespace) {
                if self.defined.contains(&full_name) {
                    return Value::String(full_name);
                }
            }
        }
        let mut out = object.clone();

        match kind.and_then(Value::as_str) {
            Some("record") | Some("error") => {
                let full_name = definition_full_name(object, namespace);
                if let Some(full_name) = &full_name {
                    self.declare(full_name, object, namespace, inlining, is_root);
                }
                let inner = full_name
                    .as_deref()
                    .and_then(namespace_of)
                    .map(str::to_string)
                    .or_else(|| namespace.map(str::to_string));

                if let Some(Value::Array(fields)) = object.get("fields") {
                    let fields = fields
                        .iter()
                        .map(|field| match field {
                            Value::Object(field) => {
                                let mut field = field.clone();
                                if let Some(ty) = field.get("type").cloned() {
                                    let ty = self.expand(&ty, inner.as_deref(), inlining, false);
                                    field.insert("type".to_string(), ty);
                                }
                                Value::Object(field)
                            }
                            other => other.clone(),
                        })
                        .collect();
                    out.insert("fields".to_string(), Value::Array(fields));
                }
            }
            Some("enum") | Some("fixed") => {
                if let Some(full_name) = definition_full_name(object, namespace) {
                    self.declare(&full_name, object, namespace, inlining, is_root);
                }
            }
            Some("array") => {
                if let Some(items) = object.get("items") {
                    let items = self.expand(items, namespace, inlining, false);
                    out.insert("items".to_string(), items);
                }
            }
            Some("map") => {
                if let Some(values) = object.get("values") {
                    let values = self.expand(values, namespace, inlining, false);
                    out.insert("values".to_string(), values);
                }
            }
            _ => {
                if let Some(ty) = kind {
                    let ty = self.expand(ty, namespace, inlining, false);
                    out.insert("type".to_string(), ty);
                }
            }
        }

        Value::Object(out)
    }

    fn declare(
        &mut self,
        full_name: &str,
        object: &Map<String, Value>,
        namespace: Option<&str>,
        inlining: bool,
        is_root: bool,
    ) {
        self.defined.insert(full_name.to_string());

        if inlining || !self.collect {
            return;
        }

        if self.names.contains(full_name) || self.own.iter().any(|d| d.full_name == full_name) {
            warn!(
                name = %full_name,
                "named type is declared more than once; keeping the first definition"
            );
            return;
        }

        self.own.push(OwnDefinition {
            full_name: full_name.to_string(),
            definition: object.clone(),
            namespace: namespace.map(str::to_string),
            is_root,
        });
    }
}

fn parse_avro(path: &Path, definition: &Value) -> Result<Schema> {
    Schema::parse(definition).map_err(|e| Error::schema_parse(path, DocumentErrorKind::Avro, e))
}

fn qualify(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(namespace) if !name.contains('.') && !namespace.is_empty() => {
            format!("{}.{}", namespace, name)
        }
        _ => name.to_string(),
    }
}

fn namespace_of(full_name: &str) -> Option<&str> {
    full_name.rsplit_once('.').map(|(namespace, _)| namespace)
}

fn definition_full_name(object: &Map<String, Value>, enclosing: Option<&str>) -> Option<String> {
    let name = object.get("name").and_then(Value::as_str).filter(|n| !n.is_empty())?;
    let namespace = object
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .or(enclosing);
    Some(qualify(name, namespace))
}

/// Pin the inherited namespace on a nested definition so it can stand alone
fn qualify_definition(mut definition: Map<String, Value>, enclosing: Option<&str>) -> Value {
    let dotted = definition
        .get("name")
        .and_then(Value::as_str)
        .map(|n| n.contains('.'))
        .unwrap_or(false);
    if let Some(enclosing) = enclosing {
        if !dotted && !definition.contains_key("namespace") {
            definition.insert("namespace".to_string(), Value::String(enclosing.to_string()));
        }
    }
    Value::Object(definition)
}
