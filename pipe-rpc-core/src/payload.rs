use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

/// An opaque byte array carrying a serialized application value.
///
/// On the wire this is base64-encoded JSON string, per spec §6; in memory it
/// is the raw UTF-8 JSON bytes, decoded lazily by [`Payload::as_value`] and
/// [`Payload::as_tuple_elements`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Serializes `value` as a single JSON value and wraps the resulting bytes.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, Error> {
        serde_json::to_vec(value)
            .map(Payload)
            .map_err(|e| Error::PayloadMalformed(e.to_string()))
    }

    /// Encodes a positional argument tuple `[v1..vn]` as a single JSON array, per spec §6.
    /// `n == 0` encodes as `[]`.
    pub fn from_args(args: &[serde_json::Value]) -> Result<Self, Error> {
        serde_json::to_vec(args)
            .map(Payload)
            .map_err(|e| Error::PayloadMalformed(e.to_string()))
    }

    /// Deserializes the payload as one value of type `T`.
    pub fn as_value<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.0).map_err(|e| Error::PayloadMalformed(e.to_string()))
    }

    /// Splits the payload into its positional JSON elements for a tuple of
    /// arity `expected`, checking arity before the caller decodes each
    /// element against its declared type.
    pub fn as_tuple_elements(&self, expected: usize) -> Result<Vec<serde_json::Value>, Error> {
        let value: serde_json::Value =
            serde_json::from_slice(&self.0).map_err(|e| Error::PayloadMalformed(e.to_string()))?;

        let array = match value {
            serde_json::Value::Array(a) => a,
            _ => return Err(Error::PayloadMalformed("payload is not a JSON array".into())),
        };

        if array.len() != expected {
            return Err(Error::ArityMismatch {
                expected,
                found: array.len(),
            });
        }

        Ok(array)
    }

    /// Decodes the `idx`-th positional element of an already-arity-checked
    /// tuple against type `T`.
    pub fn decode_element<T: DeserializeOwned>(
        elements: &[serde_json::Value],
        idx: usize,
    ) -> Result<T, Error> {
        serde_json::from_value(elements[idx].clone())
            .map_err(|e| Error::PayloadMalformed(format!("argument {idx}: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Payload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Payload(bytes))
    }
}
