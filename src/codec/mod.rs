//! Record and envelope codecs
//!
//! [`RecordCodec`] turns payloads into Avro datums for a subject and makes sure
//! the subject is known to the registry first. [`MessageEnvelopeCodec`] builds
//! the wire envelope of a message on top of it.

mod envelope;
mod record;

pub use envelope::{
    Envelope, MessageEnvelopeCodec, HEADER_CLASS, HEADER_KEY_PAYLOAD, HEADER_KEY_SUBJECT,
    HEADER_TOMBSTONE, HEADER_TYPE, HEADER_VALUE_SUBJECT,
};
pub use record::{
    normalize, AvroDatumSerializer, RecordCodec, RecordSerializer, RegistrationPolicy,
    RegistrationState,
};
