//! Subject-level Avro encoding with lazy registration

use std::sync::Arc;

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::message::Payload;
use crate::registry::{RegistryError, RegistryGateway, SchemaReference};
use crate::store::SchemaStore;

/// Writes and reads Avro datums
pub trait RecordSerializer: Send + Sync {
    fn encode_record(&self, subject: &str, schema: &Schema, payload: &Payload) -> Result<Vec<u8>>;

    fn decode_message(&self, bytes: &[u8], schema: &Schema) -> Result<AvroValue>;
}

/// Plain Avro binary datums without framing
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroDatumSerializer;

impl RecordSerializer for AvroDatumSerializer {
    fn encode_record(&self, subject: &str, schema: &Schema, payload: &Payload) -> Result<Vec<u8>> {
        let serialization = |e: apache_avro::Error| Error::Serialization {
            subject: subject.to_string(),
            message: e.to_string(),
        };

        let value = AvroValue::from(Value::Object(payload.clone()))
            .resolve(schema)
            .map_err(serialization)?;
        to_avro_datum(schema, value).map_err(serialization)
    }

    fn decode_message(&self, bytes: &[u8], schema: &Schema) -> Result<AvroValue> {
        let mut reader = bytes;
        from_avro_datum(schema, &mut reader, None)
            .map_err(|e| Error::decoding(format!("Avro datum could not be read: {}", e)))
    }
}

/// Whether subjects unknown to the registry may be registered on first use.
///
/// Both default to `false`: unknown subjects and schemas are errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Register when the subject exists with other schemas only
    pub register_missing_schemas: bool,
    /// Register when the subject does not exist yet
    pub register_missing_subjects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registering,
    Registered,
}

/// Clears an in-flight registration unless it completed
struct InFlight<'a> {
    states: &'a DashMap<String, RegistrationState>,
    subject: &'a str,
    completed: bool,
}

impl InFlight<'_> {
    fn complete(mut self) {
        self.states
            .insert(self.subject.to_string(), RegistrationState::Registered);
        self.completed = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.states.remove(self.subject);
        }
    }
}

/// Encodes and decodes payloads for a subject
pub struct RecordCodec {
    store: Arc<SchemaStore>,
    serializer: Arc<dyn RecordSerializer>,
    registry: Arc<dyn RegistryGateway>,
    policy: RegistrationPolicy,
    states: DashMap<String, RegistrationState>,
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("policy", &self.policy)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl RecordCodec {
    pub fn new(
        store: Arc<SchemaStore>,
        serializer: Arc<dyn RecordSerializer>,
        registry: Arc<dyn RegistryGateway>,
        policy: RegistrationPolicy,
    ) -> Self {
        Self {
            store,
            serializer,
            registry,
            policy,
            states: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Encode a payload with the subject's schema, registering it if needed
    pub fn encode(&self, subject: &str, payload: &Payload) -> Result<Vec<u8>> {
        let schema = self.store.get(subject)?;
        self.ensure_registered(subject)?;
        self.serializer.encode_record(subject, &schema, payload)
    }

    /// Decode a datum written with the subject's schema
    pub fn decode(&self, subject: &str, bytes: &[u8]) -> Result<Payload> {
        let schema = self.store.get(subject)?;
        let decoded = self.serializer.decode_message(bytes, &schema)?;

        match normalize(decoded)? {
            Value::Object(payload) => Ok(payload),
            _ => Err(Error::DecodeStructure {
                subject: subject.to_string(),
            }),
        }
    }

    pub fn is_registered(&self, subject: &str) -> bool {
        self.states
            .get(subject)
            .map(|s| *s == RegistrationState::Registered)
            .unwrap_or(false)
    }

    /// Make sure the registry knows the subject's schema.
    ///
    /// Returns immediately when the subject is registered or a registration
    /// is in flight. Referenced subjects are registered first.
    pub fn ensure_registered(&self, subject: &str) -> Result<()> {
        let schema = self.store.get(subject)?;

        let claimed = match self.states.entry(subject.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(RegistrationState::Registering);
                true
            }
        };
        if !claimed {
            return Ok(());
        }
        let in_flight = InFlight {
            states: &self.states,
            subject,
            completed: false,
        };

        match self.registry.schema_id(subject, &schema) {
            Ok(id) => {
                debug!(subject, id, "schema already registered");
                in_flight.complete();
                return Ok(());
            }
            Err(RegistryError::SubjectNotFound { .. })
                if self.policy.register_missing_subjects => {}
            Err(RegistryError::SchemaNotFound { .. })
                if self.policy.register_missing_schemas => {}
            Err(err) => return Err(err.into()),
        }

        let references = self.reference_descriptors(subject)?;
        let id = self.registry.register(subject, &schema, &references)?;
        info!(subject, id, references = references.len(), "registered schema subject");

        in_flight.complete();
        Ok(())
    }

    fn reference_descriptors(&self, subject: &str) -> Result<Vec<SchemaReference>> {
        let mut descriptors = Vec::new();

        for reference in self.store.references(subject) {
            self.ensure_registered(&reference)?;

            let schema = self.store.get(&reference)?;
            let version = self.registry.schema_version(&reference, &schema)?;
            let name = self
                .store
                .full_name(&reference)
                .unwrap_or_else(|| reference.clone());

            descriptors.push(SchemaReference {
                name,
                subject: reference,
                version,
            });
        }

        Ok(descriptors)
    }
}

/// Convert a decoded Avro value into plain JSON.
///
/// Records and maps become objects, unions are unwrapped, enums become their
/// symbol and bytes become arrays of numbers. Values JSON cannot represent,
/// such as non-finite floats, fail with `DecodingFailed`.
pub fn normalize(value: AvroValue) -> Result<Value> {
    let value = match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(b),
        AvroValue::Int(i) => Value::from(i),
        AvroValue::Long(i) => Value::from(i),
        AvroValue::Float(f) => float(f as f64)?,
        AvroValue::Double(f) => float(f)?,
        AvroValue::Bytes(bytes) | AvroValue::Fixed(_, bytes) => {
            Value::Array(bytes.into_iter().map(Value::from).collect())
        }
        AvroValue::String(s) => Value::String(s),
        AvroValue::Enum(_, symbol) => Value::String(symbol),
        AvroValue::Union(_, inner) => normalize(*inner)?,
        AvroValue::Array(items) => {
            Value::Array(items.into_iter().map(normalize).collect::<Result<_>>()?)
        }
        AvroValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| -> Result<(String, Value)> { Ok((k, normalize(v)?)) })
                .collect::<Result<_>>()?,
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| -> Result<(String, Value)> { Ok((k, normalize(v)?)) })
                .collect::<Result<_>>()?,
        ),
        other => Value::try_from(other)
            .map_err(|e| Error::decoding(format!("Avro value has no JSON form: {}", e)))?,
    };
    Ok(value)
}

fn float(f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| Error::decoding(format!("Avro float {} has no JSON form", f)))
}
