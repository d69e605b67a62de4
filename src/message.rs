//! Message types and the table of known types
//!
//! A message type exposes an optional key payload and an optional value payload
//! and can be rebuilt from both. Types are announced to a [`TypeRegistry`]
//! up front together with their parents and contracts, so metadata can fall
//! back along the hierarchy and decoding can construct the concrete type named
//! by the envelope.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// String-keyed payload of a message key or value
pub type Payload = serde_json::Map<String, Value>;

/// A message that can travel in an Avro envelope
pub trait AvroMessage: Send + Sync + fmt::Debug {
    /// Type id written to the envelope headers
    fn message_type(&self) -> &str;

    /// Payload encoded with the key subject
    fn key_payload(&self) -> Option<Payload>;

    /// Payload encoded with the value subject. `None` makes the message a tombstone.
    fn value_payload(&self) -> Option<Payload>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn AvroMessage {
    /// Downcast a decoded message to its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Envelope metadata declared on a message type itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvroMessageMarker {
    pub key_subject: Option<&'static str>,
    pub value_subject: Option<&'static str>,
    /// Service id of the header provider
    pub header_provider: Option<&'static str>,
}

/// A concrete message type the envelope codec can rebuild
pub trait MessageType: AvroMessage + Sized + 'static {
    /// Type id, matches what `message_type()` returns
    const TYPE_ID: &'static str;

    const MARKER: Option<AvroMessageMarker> = None;

    /// Rebuild a message from decoded payloads
    fn from_avro_payload(key: Option<Payload>, value: Option<Payload>) -> Self;
}

/// Builds a boxed message from decoded key and value payloads
pub type MessageFactory =
    Arc<dyn Fn(Option<Payload>, Option<Payload>) -> Box<dyn AvroMessage> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Concrete message type with a factory
    Message,
    /// Base type that concrete messages extend
    Abstract,
    /// Capability implemented by message types
    Contract,
}

/// Everything the registry knows about one type
#[derive(Clone)]
pub struct TypeDefinition {
    type_id: String,
    kind: TypeKind,
    message_capable: bool,
    extends: Option<String>,
    implements: Vec<String>,
    marker: Option<AvroMessageMarker>,
    factory: Option<MessageFactory>,
}

impl fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("type_id", &self.type_id)
            .field("kind", &self.kind)
            .field("message_capable", &self.message_capable)
            .field("extends", &self.extends)
            .field("implements", &self.implements)
            .field("marker", &self.marker)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl TypeDefinition {
    /// A concrete message type
    pub fn message<M: MessageType>() -> Self {
        Self {
            type_id: M::TYPE_ID.to_string(),
            kind: TypeKind::Message,
            message_capable: true,
            extends: None,
            implements: Vec::new(),
            marker: M::MARKER,
            factory: Some(Arc::new(|key, value| {
                Box::new(M::from_avro_payload(key, value)) as Box<dyn AvroMessage>
            })),
        }
    }

    /// A base type without a factory
    pub fn abstract_type(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            kind: TypeKind::Abstract,
            message_capable: false,
            extends: None,
            implements: Vec::new(),
            marker: None,
            factory: None,
        }
    }

    /// A capability contract
    pub fn contract(type_id: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Contract,
            ..Self::abstract_type(type_id)
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    /// Add an implemented contract. Contracts may implement other contracts.
    pub fn implements(mut self, contract: impl Into<String>) -> Self {
        self.implements.push(contract.into());
        self
    }

    /// Declare whether values of this type satisfy the message contract
    pub fn message_capable(mut self, capable: bool) -> Self {
        self.message_capable = capable;
        self
    }

    pub fn with_marker(mut self, marker: AvroMessageMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_message_capable(&self) -> bool {
        self.message_capable
    }

    pub fn marker(&self) -> Option<&AvroMessageMarker> {
        self.marker.as_ref()
    }

    pub fn factory(&self) -> Option<&MessageFactory> {
        self.factory.as_ref()
    }
}

#[derive(Debug, Clone)]
struct TypeEntry {
    definition: TypeDefinition,
    /// Ancestors most derived first, then contracts in declaration order
    inherits_from: Vec<String>,
}

/// Known message, abstract and contract types
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    /// Build the registry and flatten every type's hierarchy.
    ///
    /// Parents and contracts may be announced in any order. A later definition
    /// with the same type id replaces the earlier one.
    pub fn new(definitions: impl IntoIterator<Item = TypeDefinition>) -> Self {
        let definitions: HashMap<String, TypeDefinition> = definitions
            .into_iter()
            .map(|d| (d.type_id.clone(), d))
            .collect();

        let types = definitions
            .iter()
            .map(|(type_id, definition)| {
                let entry = TypeEntry {
                    definition: definition.clone(),
                    inherits_from: flatten(type_id, &definitions),
                };
                (type_id.clone(), entry)
            })
            .collect();

        Self { types }
    }

    pub fn get(&self, type_id: &str) -> Option<&TypeDefinition> {
        self.types.get(type_id).map(|e| &e.definition)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    /// Known type that satisfies the message contract
    pub fn is_message_capable(&self, type_id: &str) -> bool {
        self.get(type_id).map(|d| d.message_capable).unwrap_or(false)
    }

    /// Ancestors (most derived first) followed by implemented contracts
    pub fn inherits_from(&self, type_id: &str) -> &[String] {
        self.types
            .get(type_id)
            .map(|e| e.inherits_from.as_slice())
            .unwrap_or_default()
    }

    /// All registered type ids, sorted
    pub fn type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.types.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn flatten(type_id: &str, definitions: &HashMap<String, TypeDefinition>) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::from([type_id]);
    let mut ancestors: Vec<&str> = Vec::new();

    let mut current = definitions.get(type_id).and_then(|d| d.extends.as_deref());
    while let Some(parent) = current {
        if !seen.insert(parent) {
            break;
        }
        ancestors.push(parent);
        current = definitions.get(parent).and_then(|d| d.extends.as_deref());
    }

    // Own contracts first, then those picked up from ancestors
    let mut pending: Vec<&str> = Vec::new();
    for owner in std::iter::once(type_id).chain(ancestors.iter().copied()) {
        if let Some(definition) = definitions.get(owner) {
            pending.extend(definition.implements.iter().map(String::as_str));
        }
    }

    let mut contracts: Vec<&str> = Vec::new();
    let mut queue = std::collections::VecDeque::from(pending);
    while let Some(contract) = queue.pop_front() {
        if !seen.insert(contract) {
            continue;
        }
        contracts.push(contract);
        if let Some(definition) = definitions.get(contract) {
            queue.extend(definition.implements.iter().map(String::as_str));
        }
    }

    ancestors
        .into_iter()
        .chain(contracts)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping {
        value: Option<Payload>,
    }

    impl AvroMessage for Ping {
        fn message_type(&self) -> &str {
            Self::TYPE_ID
        }

        fn key_payload(&self) -> Option<Payload> {
            None
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
        const MARKER: Option<AvroMessageMarker> = Some(AvroMessageMarker {
            key_subject: None,
            value_subject: Some("acme.ping"),
            header_provider: None,
        });

        fn from_avro_payload(_key: Option<Payload>, value: Option<Payload>) -> Self {
            Self { value }
        }
    }

    #[test]
    fn test_message_definition_builds_instances() {
        let registry = TypeRegistry::new([TypeDefinition::message::<Ping>()]);
        let definition = registry.get("acme.Ping").unwrap();

        assert_eq!(definition.kind(), TypeKind::Message);
        assert!(registry.is_message_capable("acme.Ping"));
        assert_eq!(definition.marker().unwrap().value_subject, Some("acme.ping"));

        let mut value = Payload::new();
        value.insert("id".into(), Value::from("p-1"));
        let message = (definition.factory().unwrap())(None, Some(value.clone()));

        assert_eq!(message.message_type(), "acme.Ping");
        assert_eq!(message.downcast_ref::<Ping>().unwrap().value, Some(value));
    }

    #[test]
    fn test_hierarchy_is_flattened() {
        let registry = TypeRegistry::new([
            TypeDefinition::message::<Ping>()
                .extends("acme.Heartbeat")
                .implements("acme.Traced"),
            TypeDefinition::abstract_type("acme.Heartbeat")
                .extends("acme.Event")
                .implements("acme.Timestamped"),
            TypeDefinition::abstract_type("acme.Event"),
            TypeDefinition::contract("acme.Traced").implements("acme.Observable"),
            TypeDefinition::contract("acme.Timestamped"),
            TypeDefinition::contract("acme.Observable"),
        ]);

        assert_eq!(
            registry.inherits_from("acme.Ping"),
            [
                "acme.Heartbeat",
                "acme.Event",
                "acme.Traced",
                "acme.Timestamped",
                "acme.Observable",
            ]
        );
        assert!(!registry.is_message_capable("acme.Event"));
        assert!(!registry.is_message_capable("acme.Unknown"));
    }

    #[test]
    fn test_hierarchy_loop_terminates() {
        let registry = TypeRegistry::new([
            TypeDefinition::abstract_type("a").extends("b"),
            TypeDefinition::abstract_type("b").extends("a"),
        ]);

        assert_eq!(registry.inherits_from("a"), ["b"]);
        assert_eq!(registry.inherits_from("b"), ["a"]);
    }
}
