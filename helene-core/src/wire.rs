//! Extended-JSON wire codec (§4.1).
//!
//! `ExtValue` is a superset of JSON that round-trips values `serde_json`
//! cannot represent natively, using type-tagged objects on the wire:
//! dates as `{"$date": <epoch-ms>}`, non-finite floats as `{"$InfNaN": ±1|0}`,
//! regular expressions as `{"$regexp": ..., "$flags": ...}`, binary blobs as
//! base64 under `{"$binary": ...}`, big integers as `{"$bigint": "..."}`,
//! and user-registered types as `{"$type": name, "$value": plain}`.

use std::collections::BTreeMap;

use base64::Engine;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A wire value: JSON plus the extended type tags above.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtValue {
    Null,
    /// Distinct from `Null` — the field was present but held no value.
    Undefined,
    Bool(bool),
    Number(f64),
    NonFinite(NonFiniteKind),
    String(String),
    Date(i64),
    Regexp { pattern: String, flags: String },
    Binary(Vec<u8>),
    BigInt(String),
    Array(Vec<ExtValue>),
    Object(Vec<(String, ExtValue)>),
    /// A user-registered custom type, tagged by name.
    Custom { type_name: String, value: Box<ExtValue> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonFiniteKind {
    PositiveInfinity,
    NegativeInfinity,
    NaN,
}

impl ExtValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExtValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, ExtValue)]> {
        match self {
            ExtValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ExtValue]> {
        match self {
            ExtValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExtValue> {
        match self {
            ExtValue::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Encode to a JSON string. Circular references are dropped silently
    /// (the offending field is omitted) rather than erroring or hanging.
    pub fn encode(&self) -> String {
        serde_json::to_string(&WithCycleGuard::new(self)).unwrap_or_else(|_| "null".to_string())
    }

    /// Encode in canonical mode: object keys sorted lexicographically at
    /// every depth. Used for method-cache keys and deterministic tests.
    pub fn encode_canonical(&self) -> String {
        serde_json::to_string(&self.canonicalize()).unwrap_or_else(|_| "null".to_string())
    }

    fn canonicalize(&self) -> ExtValue {
        match self {
            ExtValue::Object(fields) => {
                let mut sorted: BTreeMap<String, ExtValue> = BTreeMap::new();
                for (k, v) in fields {
                    sorted.insert(k.clone(), v.canonicalize());
                }
                ExtValue::Object(sorted.into_iter().collect())
            }
            ExtValue::Array(items) => ExtValue::Array(items.iter().map(ExtValue::canonicalize).collect()),
            ExtValue::Custom { type_name, value } => ExtValue::Custom {
                type_name: type_name.clone(),
                value: Box::new(value.canonicalize()),
            },
            other => other.clone(),
        }
    }

    /// Decode a JSON string into an `ExtValue`, recognising the type tags.
    pub fn decode(input: &str) -> Result<ExtValue, crate::error::HeleneError> {
        serde_json::from_str(input).map_err(|e| crate::error::HeleneError::Parse(e.to_string()))
    }
}

/// Wraps a cyclic-unaware serializer pass with a depth-tracked visited set
/// so an accidental cycle in hand-built `ExtValue::Object` trees degrades
/// to omission instead of an unbounded recursion.
struct WithCycleGuard<'a> {
    value: &'a ExtValue,
}

impl<'a> WithCycleGuard<'a> {
    fn new(value: &'a ExtValue) -> Self {
        Self { value }
    }
}

impl Serialize for WithCycleGuard<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_bounded(self.value, serializer, 0)
    }
}

const MAX_ENCODE_DEPTH: usize = 64;

fn serialize_bounded<S: Serializer>(value: &ExtValue, serializer: S, depth: usize) -> Result<S::Ok, S::Error> {
    if depth > MAX_ENCODE_DEPTH {
        // Treat runaway nesting the same as a detected cycle: drop it.
        return serializer.serialize_none();
    }
    match value {
        ExtValue::Null => serializer.serialize_none(),
        ExtValue::Undefined => serializer.serialize_none(),
        ExtValue::Bool(b) => serializer.serialize_bool(*b),
        ExtValue::Number(n) => serializer.serialize_f64(*n),
        ExtValue::NonFinite(kind) => {
            let mut map = serializer.serialize_map(Some(1))?;
            let tag = match kind {
                NonFiniteKind::PositiveInfinity => 1,
                NonFiniteKind::NegativeInfinity => -1,
                NonFiniteKind::NaN => 0,
            };
            map.serialize_entry("$InfNaN", &tag)?;
            map.end()
        }
        ExtValue::String(s) => serializer.serialize_str(s),
        ExtValue::Date(ms) => {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("$date", ms)?;
            map.end()
        }
        ExtValue::Regexp { pattern, flags } => {
            let mut map = serializer.serialize_map(Some(2))?;
            map.serialize_entry("$regexp", pattern)?;
            map.serialize_entry("$flags", flags)?;
            map.end()
        }
        ExtValue::Binary(bytes) => {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("$binary", &base64::engine::general_purpose::STANDARD.encode(bytes))?;
            map.end()
        }
        ExtValue::BigInt(digits) => {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("$bigint", digits)?;
            map.end()
        }
        ExtValue::Custom { type_name, value } => {
            let mut map = serializer.serialize_map(Some(2))?;
            map.serialize_entry("$type", type_name)?;
            map.serialize_entry("$value", &Wrapped { value, depth: depth + 1 })?;
            map.end()
        }
        ExtValue::Array(items) => {
            use serde::ser::SerializeSeq;
            let mut seq = serializer.serialize_seq(Some(items.len()))?;
            for item in items {
                seq.serialize_element(&Wrapped { value: item, depth: depth + 1 })?;
            }
            seq.end()
        }
        ExtValue::Object(fields) => {
            let mut map = serializer.serialize_map(Some(fields.len()))?;
            for (k, v) in fields {
                map.serialize_entry(k, &Wrapped { value: v, depth: depth + 1 })?;
            }
            map.end()
        }
    }
}

struct Wrapped<'a> {
    value: &'a ExtValue,
    depth: usize,
}

impl Serialize for Wrapped<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_bounded(self.value, serializer, self.depth)
    }
}

impl<'de> Deserialize<'de> for ExtValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ExtValueVisitor)
    }
}

struct ExtValueVisitor;

impl<'de> Visitor<'de> for ExtValueVisitor {
    type Value = ExtValue;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a JSON value, optionally extended-JSON tagged")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(ExtValue::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
        Ok(ExtValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(ExtValue::Number(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(ExtValue::Number(v as f64))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(ExtValue::Number(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(ExtValue::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        Ok(ExtValue::String(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<ExtValue>()? {
            items.push(item);
        }
        Ok(ExtValue::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields: Vec<(String, serde_json::Value)> = Vec::new();
        while let Some((k, v)) = map.next_entry::<String, serde_json::Value>()? {
            fields.push((k, v));
        }

        // Recognise type tags before falling back to a plain object.
        if fields.len() == 1 && fields[0].0 == "$date" {
            if let Some(ms) = fields[0].1.as_i64() {
                return Ok(ExtValue::Date(ms));
            }
        }
        if fields.len() == 1 && fields[0].0 == "$InfNaN" {
            if let Some(tag) = fields[0].1.as_i64() {
                let kind = match tag {
                    1 => NonFiniteKind::PositiveInfinity,
                    -1 => NonFiniteKind::NegativeInfinity,
                    _ => NonFiniteKind::NaN,
                };
                return Ok(ExtValue::NonFinite(kind));
            }
        }
        if fields.len() == 1 && fields[0].0 == "$binary" {
            if let Some(b64) = fields[0].1.as_str() {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(b64) {
                    return Ok(ExtValue::Binary(bytes));
                }
            }
        }
        if fields.len() == 1 && fields[0].0 == "$bigint" {
            if let Some(digits) = fields[0].1.as_str() {
                return Ok(ExtValue::BigInt(digits.to_string()));
            }
        }
        if fields.len() == 2 {
            let has_regexp = fields.iter().any(|(k, _)| k == "$regexp");
            let has_flags = fields.iter().any(|(k, _)| k == "$flags");
            if has_regexp && has_flags {
                let pattern = fields
                    .iter()
                    .find(|(k, _)| k == "$regexp")
                    .and_then(|(_, v)| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let flags = fields
                    .iter()
                    .find(|(k, _)| k == "$flags")
                    .and_then(|(_, v)| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Ok(ExtValue::Regexp { pattern, flags });
            }
            let has_type = fields.iter().any(|(k, _)| k == "$type");
            let has_value = fields.iter().any(|(k, _)| k == "$value");
            if has_type && has_value {
                let type_name = fields
                    .iter()
                    .find(|(k, _)| k == "$type")
                    .and_then(|(_, v)| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let raw_value = fields
                    .iter()
                    .find(|(k, _)| k == "$value")
                    .map(|(_, v)| v.clone())
                    .unwrap_or(serde_json::Value::Null);
                let value = serde_json::from_value(raw_value)
                    .map_err(|e| de::Error::custom(e.to_string()))?;
                return Ok(ExtValue::Custom { type_name, value: Box::new(value) });
            }
        }

        let mut out = Vec::with_capacity(fields.len());
        for (k, v) in fields {
            let ext = serde_json::from_value(v).map_err(|e| de::Error::custom(e.to_string()))?;
            out.push((k, ext));
        }
        Ok(ExtValue::Object(out))
    }
}

impl From<serde_json::Value> for ExtValue {
    fn from(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or(ExtValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_object() {
        let value = ExtValue::Object(vec![
            ("a".into(), ExtValue::Number(1.0)),
            ("b".into(), ExtValue::String("x".into())),
        ]);
        let encoded = value.encode();
        let decoded = ExtValue::decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_date() {
        let value = ExtValue::Date(1_700_000_000_000);
        let decoded = ExtValue::decode(&value.encode()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_non_finite() {
        for kind in [
            NonFiniteKind::PositiveInfinity,
            NonFiniteKind::NegativeInfinity,
            NonFiniteKind::NaN,
        ] {
            let value = ExtValue::NonFinite(kind);
            assert_eq!(ExtValue::decode(&value.encode()).unwrap(), value);
        }
    }

    #[test]
    fn round_trips_regexp() {
        let value = ExtValue::Regexp { pattern: "^a+$".into(), flags: "i".into() };
        assert_eq!(ExtValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn round_trips_binary() {
        let value = ExtValue::Binary(vec![0, 1, 2, 255]);
        assert_eq!(ExtValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn round_trips_bigint() {
        let value = ExtValue::BigInt("123456789012345678901234567890".into());
        assert_eq!(ExtValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn round_trips_custom_type() {
        let value = ExtValue::Custom {
            type_name: "UserId".into(),
            value: Box::new(ExtValue::String("u-1".into())),
        };
        assert_eq!(ExtValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn canonical_mode_sorts_keys_at_every_depth() {
        let value = ExtValue::Object(vec![
            ("z".into(), ExtValue::Object(vec![
                ("y".into(), ExtValue::Number(1.0)),
                ("x".into(), ExtValue::Number(2.0)),
            ])),
            ("a".into(), ExtValue::Number(3.0)),
        ]);
        assert_eq!(
            value.encode_canonical(),
            r#"{"a":3.0,"z":{"x":2.0,"y":1.0}}"#
        );
    }

    #[test]
    fn malformed_input_is_parse_error() {
        let err = ExtValue::decode("{not json").unwrap_err();
        assert_eq!(err.code().as_str(), "PARSE_ERROR");
    }

    #[test]
    fn deeply_nested_runaway_structure_is_dropped_not_hung() {
        let mut value = ExtValue::Null;
        for _ in 0..(MAX_ENCODE_DEPTH * 2) {
            value = ExtValue::Array(vec![value]);
        }
        // Must terminate and produce valid JSON, not stack-overflow.
        let encoded = value.encode();
        assert!(serde_json::from_str::<serde_json::Value>(&encoded).is_ok());
    }
}
