//! Service lookup for header providers
//!
//! Envelope metadata names header providers by service id. Locators resolve
//! those ids; the envelope codec asks each locator in turn and the first one
//! that has the id answers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::message::{AvroMessage, Payload};

/// Adds custom headers to an encoded envelope
pub trait HeaderProvider: Send + Sync {
    /// Headers for a message. Only non-empty names with scalar values are used.
    fn headers_for_message(&self, message: &dyn AvroMessage) -> Payload;
}

impl<F> HeaderProvider for F
where
    F: Fn(&dyn AvroMessage) -> Payload + Send + Sync,
{
    fn headers_for_message(&self, message: &dyn AvroMessage) -> Payload {
        self(message)
    }
}

/// A resolved service
#[derive(Clone)]
pub enum Service {
    HeaderProvider(Arc<dyn HeaderProvider>),
    Other(Arc<dyn Any + Send + Sync>),
}

impl Service {
    pub fn as_header_provider(&self) -> Option<&Arc<dyn HeaderProvider>> {
        match self {
            Self::HeaderProvider(provider) => Some(provider),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderProvider(_) => f.write_str("Service::HeaderProvider"),
            Self::Other(_) => f.write_str("Service::Other"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Service \"{id}\" not found")]
    NotFound { id: String },

    #[error("Service \"{id}\" could not be created: {message}")]
    Resolution { id: String, message: String },
}

/// Resolves services by id
pub trait ServiceLocator: Send + Sync {
    fn has(&self, id: &str) -> bool;

    fn get(&self, id: &str) -> Result<Service, LocatorError>;
}

type ServiceFactory = Arc<dyn Fn() -> Result<Service, String> + Send + Sync>;

#[derive(Clone)]
enum ServiceEntry {
    Instance(Service),
    Factory(ServiceFactory),
}

/// Locator backed by a map of instances and factories
#[derive(Clone, Default)]
pub struct ServiceMap {
    services: HashMap<String, ServiceEntry>,
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("ServiceMap").field("services", &ids).finish()
    }
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header_provider(
        mut self,
        id: impl Into<String>,
        provider: impl HeaderProvider + 'static,
    ) -> Self {
        self.insert(id, Service::HeaderProvider(Arc::new(provider)));
        self
    }

    /// Register a service that is not a header provider
    pub fn with_service(
        mut self,
        id: impl Into<String>,
        service: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        self.insert(id, Service::Other(service));
        self
    }

    /// Register a factory invoked on every lookup
    pub fn with_factory<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Service, String> + Send + Sync + 'static,
    {
        self.services
            .insert(id.into(), ServiceEntry::Factory(Arc::new(factory)));
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, service: Service) {
        self.services.insert(id.into(), ServiceEntry::Instance(service));
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceLocator for ServiceMap {
    fn has(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    fn get(&self, id: &str) -> Result<Service, LocatorError> {
        match self.services.get(id) {
            Some(ServiceEntry::Instance(service)) => Ok(service.clone()),
            Some(ServiceEntry::Factory(factory)) => {
                factory().map_err(|message| LocatorError::Resolution {
                    id: id.to_string(),
                    message,
                })
            }
            None => Err(LocatorError::NotFound { id: id.to_string() }),
        }
    }
}
