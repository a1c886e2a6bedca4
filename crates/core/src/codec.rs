//! Typed payload registry.
//!
//! Persisted records carry a `payload_type` name and JSON payload bytes. The
//! [`PayloadRegistry`] is an explicit registration table from type name to
//! decode function, populated at startup. Resolving an unregistered name is a
//! declared error path ([`CodecError::UnknownType`]) rather than a reflection
//! failure, and the processors count it as a retryable dispatch failure:
//! the type may become registrable after a deployment.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown payload type: {0}")]
    UnknownType(String),

    #[error("deserialization failed for '{type_name}': {source}")]
    Deserialization {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// A materialized payload: the persisted type name plus the decoded value.
///
/// The value is type-erased so one dispatcher signature covers every
/// registered type; handlers downcast to the concrete type they registered.
pub struct Payload {
    type_name: String,
    value: Box<dyn Any + Send>,
}

impl Payload {
    /// Wrap an already-materialized value (the inbound path, where the
    /// transport has deserialized the request before the Inbox Guard runs).
    pub fn new<T: Send + 'static>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            value: Box::new(value),
        }
    }

    /// The persisted type name this payload was resolved from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Borrow the decoded value as a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take ownership of the decoded value as a concrete type.
    pub fn downcast<T: 'static>(self) -> Result<T, Payload> {
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(Payload {
                type_name: self.type_name,
                value,
            }),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, serde_json::Error> + Send + Sync>;

/// Registration table from payload type name to decode function.
#[derive(Default, Clone)]
pub struct PayloadRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl PayloadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decodable type under the given name.
    pub fn register<T>(&mut self, type_name: impl Into<String>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let decode: DecodeFn = Arc::new(|bytes| {
            let value: T = serde_json::from_slice(bytes)?;
            Ok(Box::new(value) as Box<dyn Any + Send>)
        });
        self.decoders.insert(type_name.into(), decode);
    }

    /// Whether a type name has a registered decoder.
    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    /// Resolve a type name and decode the payload bytes.
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Payload, CodecError> {
        let decode = self
            .decoders
            .get(type_name)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
        let value = decode(bytes).map_err(|source| CodecError::Deserialization {
            type_name: type_name.to_string(),
            source,
        })?;
        Ok(Payload {
            type_name: type_name.to_string(),
            value,
        })
    }

    /// Serialize a value to payload bytes.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::Serialization)
    }
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
