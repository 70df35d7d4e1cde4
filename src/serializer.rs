//! Value serialization with a one-byte format tag.
//!
//! `J` + UTF-8 JSON for values expressible in JSON (string, number, bool,
//! null, array, map); `P` + opaque bytes for anything richer. A missing or
//! unrecognized prefix is treated as opaque-legacy, matching the source's
//! "unknown marker falls back to pickle" fallback with bytes standing in
//! for pickle.

use serde_json::Value;

use crate::error::SerializationError;

const JSON_TAG: u8 = b'J';
const OPAQUE_TAG: u8 = b'P';

/// Serializes a JSON value to its tagged wire form.
pub fn serialize(value: &Value) -> Result<Vec<u8>, SerializationError> {
    let json = serde_json::to_vec(value).map_err(|e| SerializationError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(json.len() + 1);
    out.push(JSON_TAG);
    out.extend_from_slice(&json);
    Ok(out)
}

/// Serializes opaque bytes that are not representable as JSON.
#[must_use]
pub fn serialize_opaque(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(OPAQUE_TAG);
    out.extend_from_slice(bytes);
    out
}

/// Decoded form of a stored entry: either a JSON value, or opaque bytes
/// that didn't round-trip through JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Opaque(Vec<u8>),
}

/// Deserializes a tagged wire value.
pub fn deserialize(data: &[u8]) -> Result<Decoded, SerializationError> {
    match data.split_first() {
        Some((&JSON_TAG, rest)) => serde_json::from_slice(rest)
            .map(Decoded::Json)
            .map_err(|e| SerializationError::Decode(e.to_string())),
        Some((&OPAQUE_TAG, rest)) => Ok(Decoded::Opaque(rest.to_vec())),
        // Missing/unrecognized prefix: treat the whole payload as opaque legacy data.
        _ => Ok(Decoded::Opaque(data.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_value_round_trips() {
        let value = json!({"a": 1, "b": [true, null, "x"]});
        let wire = serialize(&value).unwrap();
        assert_eq!(wire[0], JSON_TAG);
        assert_eq!(deserialize(&wire).unwrap(), Decoded::Json(value));
    }

    #[test]
    fn opaque_bytes_round_trip() {
        let bytes = vec![0u8, 255, 1, 2, 3];
        let wire = serialize_opaque(&bytes);
        assert_eq!(wire[0], OPAQUE_TAG);
        assert_eq!(deserialize(&wire).unwrap(), Decoded::Opaque(bytes));
    }

    #[test]
    fn missing_prefix_falls_back_to_opaque() {
        let legacy = vec![1, 2, 3];
        assert_eq!(deserialize(&legacy).unwrap(), Decoded::Opaque(legacy));
    }
}
