//! The pluggable object codec (§4.1, §6.4).
//!
//! The wire only ever carries a type-name hint and a byte payload; what
//! those bytes mean is entirely up to the [`Serializer`] implementation.
//! The default [`JsonSerializer`] represents decoded values as
//! [`serde_json::Value`], which already preserves whatever polymorphic
//! discriminator the original `serde::Serialize` impl embedded (an
//! internally/adjacently tagged enum round-trips through `Value` with its
//! tag intact) — matching §6.4's "preserves polymorphic type information"
//! default.

use bytes::Bytes;
use std::fmt;

/// Raised when a frame's payload can't be encoded or decoded.
#[derive(Debug, Clone)]
pub enum SerializerError {
    /// The type name on the frame isn't known to this peer's serializer.
    TypeNotFound(String),
    /// Encoding or decoding the payload itself failed.
    Codec(String),
}

impl fmt::Display for SerializerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeNotFound(name) => write!(f, "unknown type '{name}'"),
            Self::Codec(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SerializerError {}

/// Converts an application value to/from bytes given a nominal type name.
///
/// Implementations only need to agree on a shared set of `type_name`
/// strings with their peer; the core never interprets the name itself
/// except for the literal `"byte[]"` bypass (§4.1).
pub trait Serializer: Send + Sync + fmt::Debug {
    fn encode(&self, type_name: &str, value: &serde_json::Value) -> Result<Bytes, SerializerError>;
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<serde_json::Value, SerializerError>;
}

/// Literal `TypeName` that bypasses the serializer entirely (§4.1):
/// `byte[]` payloads are transmitted verbatim in both directions.
pub const RAW_BYTES_TYPE_NAME: &str = "byte[]";

/// The process default: `serde_json`, one `type_name` per concrete Rust
/// type the application registers meaning for. Unknown type names are
/// still encodable (the sender always knows its own type) but fail to
/// decode on a receiver that has never heard of them.
#[derive(Debug, Default, Clone)]
pub struct JsonSerializer {
    known_types: std::collections::HashSet<String>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type name as resolvable by this serializer. Decoding a
    /// `type_name` that was never registered raises
    /// [`SerializerError::TypeNotFound`] rather than silently succeeding.
    pub fn register(mut self, type_name: impl Into<String>) -> Self {
        self.known_types.insert(type_name.into());
        self
    }
}

impl Serializer for JsonSerializer {
    fn encode(&self, _type_name: &str, value: &serde_json::Value) -> Result<Bytes, SerializerError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| SerializerError::Codec(err.to_string()))
    }

    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<serde_json::Value, SerializerError> {
        if !self.known_types.is_empty() && !self.known_types.contains(type_name) {
            return Err(SerializerError::TypeNotFound(type_name.to_string()));
        }
        serde_json::from_slice(bytes).map_err(|err| SerializerError::Codec(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_registered_type() {
        let ser = JsonSerializer::new().register("demo::Ping");
        let value = serde_json::json!({"n": 1});
        let bytes = ser.encode("demo::Ping", &value).unwrap();
        let decoded = ser.decode("demo::Ping", &bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn unknown_type_name_is_reported() {
        let ser = JsonSerializer::new().register("demo::Ping");
        let err = ser.decode("demo::Unknown", b"{}").unwrap_err();
        assert!(matches!(err, SerializerError::TypeNotFound(_)));
    }

    #[test]
    fn serializer_with_no_registrations_decodes_anything() {
        let ser = JsonSerializer::new();
        let decoded = ser.decode("anything", b"42").unwrap();
        assert_eq!(decoded, serde_json::json!(42));
    }
}
