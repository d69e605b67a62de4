//! Wire envelopes for Avro messages
//!
//! An envelope carries the Avro value datum as its body. Headers name the
//! message type and the subjects used, carry the key datum as base64 and mark
//! tombstones.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use tracing::debug;

use crate::codec::RecordCodec;
use crate::error::{Error, Result};
use crate::locator::{HeaderProvider, ServiceLocator};
use crate::message::AvroMessage;
use crate::metadata::{MessageMetadata, MessageMetadataCatalog};

pub const HEADER_TYPE: &str = "type";
pub const HEADER_CLASS: &str = "x-chargecloud-avro-class";
pub const HEADER_KEY_SUBJECT: &str = "x-chargecloud-avro-key-subject";
pub const HEADER_VALUE_SUBJECT: &str = "x-chargecloud-avro-value-subject";
pub const HEADER_KEY_PAYLOAD: &str = "x-chargecloud-avro-key";
pub const HEADER_TOMBSTONE: &str = "x-chargecloud-avro-tombstone";

const TOMBSTONE: &str = "1";

/// Encoded message as it travels on the bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(body: Vec<u8>, headers: BTreeMap<String, String>) -> Self {
        Self { body, headers }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_tombstone(&self) -> bool {
        self.header(HEADER_TOMBSTONE) == Some(TOMBSTONE)
    }
}

/// Builds and parses envelopes for registered message types
pub struct MessageEnvelopeCodec {
    metadata: Arc<MessageMetadataCatalog>,
    records: Arc<RecordCodec>,
    locators: Vec<Arc<dyn ServiceLocator>>,
}

impl fmt::Debug for MessageEnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEnvelopeCodec")
            .field("metadata", &self.metadata)
            .field("records", &self.records)
            .field("locators", &self.locators.len())
            .finish()
    }
}

impl MessageEnvelopeCodec {
    pub fn new(metadata: Arc<MessageMetadataCatalog>, records: Arc<RecordCodec>) -> Self {
        Self {
            metadata,
            records,
            locators: Vec::new(),
        }
    }

    /// Add a locator for header providers. Locators are asked in the order
    /// they were added.
    pub fn with_locator(mut self, locator: Arc<dyn ServiceLocator>) -> Self {
        self.locators.push(locator);
        self
    }

    pub fn metadata(&self) -> &Arc<MessageMetadataCatalog> {
        &self.metadata
    }

    pub fn records(&self) -> &Arc<RecordCodec> {
        &self.records
    }

    /// Encode a message into an envelope
    pub fn encode(&self, message: &dyn AvroMessage) -> Result<Envelope> {
        let type_id = message.message_type();
        let metadata = self.metadata.get(type_id)?.ok_or_else(|| {
            Error::logic(format!(
                "No Avro metadata registered for message \"{}\".",
                type_id
            ))
        })?;

        let mut headers = BTreeMap::new();
        headers.insert(HEADER_CLASS.to_string(), metadata.type_id.clone());
        headers.insert(HEADER_TYPE.to_string(), metadata.type_id.clone());

        if let (Some(key_subject), Some(key)) = (&metadata.key_subject, message.key_payload()) {
            let encoded = self.records.encode(key_subject, &key)?;
            headers.insert(HEADER_KEY_SUBJECT.to_string(), key_subject.clone());
            headers.insert(
                HEADER_KEY_PAYLOAD.to_string(),
                general_purpose::STANDARD.encode(encoded),
            );
        }

        let body = match (&metadata.value_subject, message.value_payload()) {
            (Some(value_subject), Some(value)) => {
                let body = self.records.encode(value_subject, &value)?;
                headers.insert(HEADER_VALUE_SUBJECT.to_string(), value_subject.clone());
                body
            }
            _ => {
                headers.insert(HEADER_TOMBSTONE.to_string(), TOMBSTONE.to_string());
                Vec::new()
            }
        };

        self.merge_provider_headers(&mut headers, &metadata, message)?;

        debug!(
            type_id,
            body_len = body.len(),
            headers = headers.len(),
            "encoded avro envelope"
        );

        Ok(Envelope { body, headers })
    }

    /// Rebuild a message from an envelope
    pub fn decode(&self, envelope: &Envelope) -> Result<Box<dyn AvroMessage>> {
        let type_id = envelope
            .header(HEADER_CLASS)
            .or_else(|| envelope.header(HEADER_TYPE))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::decoding("Missing message type information in headers."))?;

        let definition = self
            .metadata
            .types()
            .get(type_id)
            .filter(|d| d.is_message_capable())
            .ok_or_else(|| {
                Error::decoding(format!(
                    "Message type \"{}\" is not a known Avro message type.",
                    type_id
                ))
            })?;

        let metadata = self.metadata.get(type_id)?.ok_or_else(|| {
            Error::decoding(format!(
                "No Avro metadata registered for message \"{}\".",
                type_id
            ))
        })?;

        let binary_key = envelope
            .header(HEADER_KEY_PAYLOAD)
            .map(|encoded| {
                general_purpose::STANDARD.decode(encoded).map_err(|e| {
                    Error::decoding(format!(
                        "Failed to decode base64 encoded key payload: {}",
                        e
                    ))
                })
            })
            .transpose()?;

        let key = match (binary_key, &metadata.key_subject) {
            (Some(bytes), Some(key_subject)) => Some(self.records.decode(key_subject, &bytes)?),
            _ => None,
        };

        let value = match &metadata.value_subject {
            Some(value_subject) if !envelope.is_tombstone() && !envelope.body.is_empty() => {
                Some(self.records.decode(value_subject, &envelope.body)?)
            }
            _ => None,
        };

        let factory = definition.factory().ok_or_else(|| {
            Error::decoding(format!(
                "Message type \"{}\" cannot be constructed from an Avro payload.",
                type_id
            ))
        })?;

        debug!(type_id, tombstone = value.is_none(), "decoded avro envelope");

        Ok(factory(key, value))
    }

    /// Check that every header provider named by resolved metadata can be
    /// located and is a header provider
    pub fn validate_header_providers(&self) -> Result<()> {
        for metadata in self.metadata.all() {
            if let Some(provider_id) = &metadata.header_provider_id {
                self.header_provider(provider_id)?;
            }
        }
        Ok(())
    }

    fn merge_provider_headers(
        &self,
        headers: &mut BTreeMap<String, String>,
        metadata: &MessageMetadata,
        message: &dyn AvroMessage,
    ) -> Result<()> {
        let Some(provider_id) = &metadata.header_provider_id else {
            return Ok(());
        };

        let provider = self.header_provider(provider_id)?;
        for (name, value) in provider.headers_for_message(message) {
            if name.is_empty() {
                continue;
            }
            if let Some(value) = scalar_header(&value) {
                headers.insert(name, value);
            }
        }

        Ok(())
    }

    fn header_provider(&self, provider_id: &str) -> Result<Arc<dyn HeaderProvider>> {
        let locator = self
            .locators
            .iter()
            .find(|l| l.has(provider_id))
            .ok_or_else(|| {
                Error::logic(format!(
                    "Header provider \"{}\" could not be located.",
                    provider_id
                ))
            })?;

        let service = locator.get(provider_id).map_err(|e| {
            Error::logic(format!(
                "Failed to resolve header provider \"{}\": {}",
                provider_id, e
            ))
        })?;

        service.as_header_provider().cloned().ok_or_else(|| {
            Error::logic(format!(
                "Service \"{}\" is not a header provider.",
                provider_id
            ))
        })
    }
}

/// Render a scalar header value. Arrays, objects and nulls are dropped.
fn scalar_header(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::codec::{AvroDatumSerializer, RegistrationPolicy};
    use crate::locator::ServiceMap;
    use crate::message::{MessageType, Payload, TypeDefinition, TypeRegistry};
    use crate::registry::InMemoryRegistry;
    use crate::store::SchemaStore;
    use serde_json::json;
    use std::any::Any;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping {
        key: Option<Payload>,
        value: Option<Payload>,
    }

    impl AvroMessage for Ping {
        fn message_type(&self) -> &str {
            Self::TYPE_ID
        }
        fn key_payload(&self) -> Option<Payload> {
            self.key.clone()
        }
        fn value_payload(&self) -> Option<Payload> {
            self.value.clone()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl MessageType for Ping {
        const TYPE_ID: &'static str = "acme.Ping";

        fn from_avro_payload(key: Option<Payload>, value: Option<Payload>) -> Self {
            Self { key, value }
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    fn codec(
        metadata: MessageMetadata,
        locator: Option<ServiceMap>,
    ) -> (TempDir, MessageEnvelopeCodec) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme")).unwrap();
        fs::write(
            dir.path().join("acme/ping-key.avsc"),
            r#"{"type":"record","name":"PingKey","namespace":"acme","fields":[{"name":"id","type":"string"}]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("acme/ping-value.avsc"),
            r#"{"type":"record","name":"PingValue","namespace":"acme","fields":[{"name":"id","type":"string"},{"name":"count","type":"long"}]}"#,
        )
        .unwrap();

        let store = Arc::new(SchemaStore::open(SchemaCatalog::new([dir.path()])).unwrap());
        let records = Arc::new(RecordCodec::new(
            store,
            Arc::new(AvroDatumSerializer),
            Arc::new(InMemoryRegistry::new()),
            RegistrationPolicy {
                register_missing_schemas: true,
                register_missing_subjects: true,
            },
        ));
        let types = Arc::new(TypeRegistry::new([
            TypeDefinition::message::<Ping>(),
            TypeDefinition::abstract_type("acme.Abstract").message_capable(true),
        ]));
        let catalog = Arc::new(MessageMetadataCatalog::new(
            [metadata, MessageMetadata::new("acme.Abstract").with_value_subject("acme.ping-value")],
            types,
        ));

        let mut codec = MessageEnvelopeCodec::new(catalog, records);
        if let Some(locator) = locator {
            codec = codec.with_locator(Arc::new(locator));
        }
        (dir, codec)
    }

    fn ping_metadata() -> MessageMetadata {
        MessageMetadata::new("acme.Ping")
            .with_key_subject("acme.ping-key")
            .with_value_subject("acme.ping-value")
    }

    fn ping() -> Ping {
        Ping {
            key: Some(payload(json!({"id": "p-1"}))),
            value: Some(payload(json!({"id": "p-1", "count": 3}))),
        }
    }

    #[test]
    fn test_round_trip() {
        let (_dir, codec) = codec(ping_metadata(), None);
        let message = ping();

        let envelope = codec.encode(&message).unwrap();
        assert_eq!(envelope.header(HEADER_CLASS), Some("acme.Ping"));
        assert_eq!(envelope.header(HEADER_TYPE), Some("acme.Ping"));
        assert_eq!(envelope.header(HEADER_KEY_SUBJECT), Some("acme.ping-key"));
        assert_eq!(envelope.header(HEADER_VALUE_SUBJECT), Some("acme.ping-value"));
        assert!(envelope.header(HEADER_KEY_PAYLOAD).is_some());
        assert!(!envelope.is_tombstone());
        assert!(!envelope.body.is_empty());

        let decoded = codec.decode(&envelope).unwrap();
        assert_eq!(decoded.downcast_ref::<Ping>(), Some(&message));
    }

    #[test]
    fn test_tombstone() {
        let (_dir, codec) = codec(ping_metadata(), None);
        let message = Ping {
            value: None,
            ..ping()
        };

        let envelope = codec.encode(&message).unwrap();
        assert_eq!(envelope.header(HEADER_TOMBSTONE), Some("1"));
        assert!(envelope.body.is_empty());
        assert!(envelope.header(HEADER_VALUE_SUBJECT).is_none());

        let decoded = codec.decode(&envelope).unwrap();
        assert_eq!(decoded.value_payload(), None);
        assert_eq!(decoded.key_payload(), message.key);
    }

    #[test]
    fn test_missing_value_subject_is_always_a_tombstone() {
        let (_dir, codec) = codec(MessageMetadata::new("acme.Ping"), None);

        let envelope = codec.encode(&ping()).unwrap();
        assert!(envelope.is_tombstone());
        assert!(envelope.header(HEADER_KEY_PAYLOAD).is_none());

        let decoded = codec.decode(&envelope).unwrap();
        assert_eq!(decoded.key_payload(), None);
        assert_eq!(decoded.value_payload(), None);
    }

    #[test]
    fn test_provider_headers_win() {
        let provider = |_: &dyn AvroMessage| {
            payload(json!({
                "type": "overridden",
                "x-trace": "abc",
                "x-count": 7,
                "x-flag": true,
                "x-off": false,
                "x-list": [1, 2],
                "x-null": null,
                "": "empty"
            }))
        };
        let locator = ServiceMap::new().with_header_provider("headers", provider);
        let (_dir, codec) = codec(ping_metadata().with_header_provider("headers"), Some(locator));

        let envelope = codec.encode(&ping()).unwrap();

        assert_eq!(envelope.header(HEADER_TYPE), Some("overridden"));
        assert_eq!(envelope.header("x-trace"), Some("abc"));
        assert_eq!(envelope.header("x-count"), Some("7"));
        assert_eq!(envelope.header("x-flag"), Some("1"));
        assert_eq!(envelope.header("x-off"), Some(""));
        assert!(envelope.header("x-list").is_none());
        assert!(envelope.header("x-null").is_none());
        assert!(envelope.header("").is_none());

        // the class header still names the type
        assert!(codec.decode(&envelope).is_ok());
    }

    #[test]
    fn test_header_provider_resolution_errors() {
        let missing = codec(ping_metadata().with_header_provider("headers"), None).1;
        assert!(matches!(missing.encode(&ping()), Err(Error::Logic(_))));
        assert!(matches!(missing.validate_header_providers(), Err(Error::Logic(_))));

        let wrong_kind = ServiceMap::new().with_service("headers", Arc::new("not a provider"));
        let wrong = codec(ping_metadata().with_header_provider("headers"), Some(wrong_kind)).1;
        assert!(matches!(wrong.encode(&ping()), Err(Error::Logic(_))));

        let fine = ServiceMap::new()
            .with_header_provider("headers", |_: &dyn AvroMessage| Payload::new());
        let ok = codec(ping_metadata().with_header_provider("headers"), Some(fine)).1;
        assert!(ok.validate_header_providers().is_ok());
    }

    #[test]
    fn test_decode_failures() {
        let (_dir, codec) = codec(ping_metadata(), None);

        let no_type = Envelope::default();
        assert!(matches!(codec.decode(&no_type), Err(Error::DecodingFailed(_))));

        let mut unknown = Envelope::default();
        unknown.headers.insert(HEADER_TYPE.into(), "acme.Unknown".into());
        assert!(matches!(codec.decode(&unknown), Err(Error::DecodingFailed(_))));

        let mut bad_key = codec.encode(&ping()).unwrap();
        bad_key.headers.insert(HEADER_KEY_PAYLOAD.into(), "%%%".into());
        assert!(matches!(codec.decode(&bad_key), Err(Error::DecodingFailed(_))));

        let mut abstract_type = Envelope::default();
        abstract_type.headers.insert(HEADER_CLASS.into(), "acme.Abstract".into());
        assert!(matches!(codec.decode(&abstract_type), Err(Error::DecodingFailed(_))));
    }

    #[test]
    fn test_class_header_wins_over_type() {
        let (_dir, codec) = codec(ping_metadata(), None);
        let mut envelope = codec.encode(&ping()).unwrap();
        envelope.headers.insert(HEADER_TYPE.into(), "acme.Unknown".into());

        assert!(codec.decode(&envelope).is_ok());
    }

    #[test]
    fn test_encode_without_metadata() {
        let (_dir, codec) = codec(MessageMetadata::new("acme.Other"), None);
        assert!(matches!(codec.encode(&ping()), Err(Error::Logic(_))));
    }
}
