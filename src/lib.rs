//! Avro Envelope
//!
//! Avro message envelopes backed by a directory of schema documents and a
//! schema registry.
//!
//! ## Features
//!
//! - **Schema Catalog**: Scans `.avsc` documents, derives subjects from names
//!   and directories, and resolves cross-document references in dependency order
//! - **Shared Named Types**: A type defined once is the same parsed schema in
//!   every document that references it
//! - **Lazy Registration**: Subjects are registered with the registry on first
//!   use, references first, with a fail-closed default policy
//! - **Envelopes**: Key and value datums, subject headers, tombstones and
//!   custom headers from header providers
//! - **Metadata Fallback**: Message types inherit metadata from ancestors and
//!   contracts
//!
//! ## Architecture
//!
//! ```text
//! MessageEnvelopeCodec ──► MessageMetadataCatalog ──► TypeRegistry
//!         │
//!         ▼
//!    RecordCodec ──► RegistryGateway
//!         │
//!         ▼
//!    SchemaStore ──► SchemaCatalog ──► schema documents
//! ```

pub mod catalog;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod locator;
pub mod message;
pub mod metadata;
pub mod registry;
pub mod schema;
pub mod store;

pub use catalog::{SchemaCatalog, SchemaSet};
pub use checksum::Checksum;
pub use codec::{
    AvroDatumSerializer, Envelope, MessageEnvelopeCodec, RecordCodec, RecordSerializer,
    RegistrationPolicy,
};
pub use config::AvroEnvelopeConfig;
pub use error::{Error, Result};
pub use locator::{HeaderProvider, ServiceLocator, ServiceMap};
pub use message::{
    AvroMessage, AvroMessageMarker, MessageType, Payload, TypeDefinition, TypeRegistry,
};
pub use metadata::{MessageMetadata, MessageMetadataCatalog};
pub use registry::{
    CachedRegistry, InMemoryRegistry, RegistryError, RegistryGateway, SchemaReference,
};
pub use store::SchemaStore;
