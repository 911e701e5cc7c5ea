//! Text codec for stored values.
//!
//! Values are written as JSON. The four types JSON cannot carry natively are
//! wrapped in single-key tag objects:
//!
//! - `{"__bigint": "<digits>"}`
//! - `{"__date": "<ISO-8601>"}`
//! - `{"__map": [[k, v], ...]}`
//! - `{"__set": [v, ...]}`
//!
//! Tags are recognised at every depth on decode, so extended values nested
//! inside arrays, objects, maps and sets survive a round trip.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, StateError};

const TAG_BIGINT: &str = "__bigint";
const TAG_DATE: &str = "__date";
const TAG_MAP: &str = "__map";
const TAG_SET: &str = "__set";

/// Reserved wrapper keys, in the order they are sniffed.
pub const RESERVED_TAGS: [&str; 4] = [TAG_BIGINT, TAG_DATE, TAG_MAP, TAG_SET];

/// A value that can be persisted through a storage manager.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<StoredValue>),
    Object(BTreeMap<String, StoredValue>),
    /// Integer wider than a JSON number can represent exactly.
    BigInt(i128),
    /// Timestamp with millisecond precision. Build with [`StoredValue::date`];
    /// finer precision is dropped on encode and does not compare equal after
    /// a round trip.
    Date(DateTime<Utc>),
    /// Ordered key/value pairs with arbitrary keys.
    Map(Vec<(StoredValue, StoredValue)>),
    /// Unique elements in insertion order. Build with [`StoredValue::set`];
    /// later duplicates are dropped on encode.
    Set(Vec<StoredValue>),
}

/// The variant tag of a [`StoredValue`], used for explicit shape checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    BigInt,
    Date,
    Map,
    Set,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::BigInt => "bigint",
            ValueKind::Date => "date",
            ValueKind::Map => "map",
            ValueKind::Set => "set",
        };
        f.write_str(name)
    }
}

impl StoredValue {
    /// Build a set, dropping later duplicates.
    pub fn set(items: impl IntoIterator<Item = StoredValue>) -> Self {
        let mut unique: Vec<StoredValue> = Vec::new();
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        StoredValue::Set(unique)
    }

    /// Build a map. A repeated key replaces the earlier value in place.
    pub fn map(pairs: impl IntoIterator<Item = (StoredValue, StoredValue)>) -> Self {
        let mut entries: Vec<(StoredValue, StoredValue)> = Vec::new();
        for (k, v) in pairs {
            match entries.iter().position(|(existing, _)| *existing == k) {
                Some(index) => entries[index].1 = v,
                None => entries.push((k, v)),
            }
        }
        StoredValue::Map(entries)
    }

    /// Build a date, truncated to the millisecond precision of the wire format.
    pub fn date(at: DateTime<Utc>) -> Self {
        let truncated = DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at);
        StoredValue::Date(truncated)
    }

    /// Build an object from `(field, value)` pairs.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, StoredValue)>) -> Self {
        StoredValue::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            StoredValue::Null => ValueKind::Null,
            StoredValue::Bool(_) => ValueKind::Bool,
            StoredValue::Number(_) => ValueKind::Number,
            StoredValue::String(_) => ValueKind::String,
            StoredValue::Array(_) => ValueKind::Array,
            StoredValue::Object(_) => ValueKind::Object,
            StoredValue::BigInt(_) => ValueKind::BigInt,
            StoredValue::Date(_) => ValueKind::Date,
            StoredValue::Map(_) => ValueKind::Map,
            StoredValue::Set(_) => ValueKind::Set,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoredValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoredValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoredValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<StoredValue>> {
        match self {
            StoredValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, StoredValue>> {
        match self {
            StoredValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a field of an object value.
    pub fn field(&self, name: &str) -> Option<&StoredValue> {
        self.as_object().and_then(|fields| fields.get(name))
    }

    /// Lower to a JSON tree, wrapping extended types in their tag objects.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            StoredValue::Null => JsonValue::Null,
            StoredValue::Bool(b) => JsonValue::Bool(*b),
            StoredValue::Number(n) => JsonValue::Number(n.clone()),
            StoredValue::String(s) => JsonValue::String(s.clone()),
            StoredValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(StoredValue::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            StoredValue::Object(fields) => {
                if fields.len() == 1 {
                    if let Some(name) = fields.keys().find(|k| RESERVED_TAGS.contains(&k.as_str())) {
                        return Err(StateError::Serialization(format!(
                            "object with sole field {name:?} collides with a reserved tag"
                        )));
                    }
                }
                let mut out = JsonMap::new();
                for (k, v) in fields {
                    out.insert(k.clone(), v.to_json()?);
                }
                JsonValue::Object(out)
            }
            StoredValue::BigInt(n) => tagged(TAG_BIGINT, JsonValue::String(n.to_string())),
            StoredValue::Date(at) => tagged(
                TAG_DATE,
                JsonValue::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
            StoredValue::Map(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    pairs.push(JsonValue::Array(vec![k.to_json()?, v.to_json()?]));
                }
                tagged(TAG_MAP, JsonValue::Array(pairs))
            }
            StoredValue::Set(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if !items[..i].contains(item) {
                        out.push(item.to_json()?);
                    }
                }
                tagged(TAG_SET, JsonValue::Array(out))
            }
        })
    }

    /// Rebuild from a JSON tree, reconstructing tagged nodes at any depth.
    pub fn from_json(json: JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => StoredValue::Null,
            JsonValue::Bool(b) => StoredValue::Bool(b),
            JsonValue::Number(n) => StoredValue::Number(n),
            JsonValue::String(s) => StoredValue::String(s),
            JsonValue::Array(items) => StoredValue::Array(
                items
                    .into_iter()
                    .map(StoredValue::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(fields) => {
                if let Some(value) = sniff_tag(&fields)? {
                    return Ok(value);
                }
                let mut out = BTreeMap::new();
                for (k, v) in fields {
                    out.insert(k, StoredValue::from_json(v)?);
                }
                StoredValue::Object(out)
            }
        })
    }

    /// Convert any serde-serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let json =
            serde_json::to_value(value).map_err(|e| StateError::Serialization(e.to_string()))?;
        StoredValue::from_json(json)
    }

    /// Convert into a serde-deserializable value. Extended types are exposed
    /// to the target type in their tagged form.
    pub fn to_deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let json = self.to_json()?;
        serde_json::from_value(json).map_err(|e| StateError::Deserialization(e.to_string()))
    }
}

fn tagged(tag: &str, payload: JsonValue) -> JsonValue {
    let mut out = JsonMap::with_capacity(1);
    out.insert(tag.to_string(), payload);
    JsonValue::Object(out)
}

fn sniff_tag(fields: &JsonMap<String, JsonValue>) -> Result<Option<StoredValue>> {
    if fields.len() != 1 {
        return Ok(None);
    }
    let Some((tag, payload)) = fields.iter().next() else {
        return Ok(None);
    };

    let malformed = |what: &str| StateError::Deserialization(format!("malformed {tag} tag: {what}"));

    let value = match tag.as_str() {
        TAG_BIGINT => {
            let digits = payload.as_str().ok_or_else(|| malformed("expected a string"))?;
            let n = digits
                .parse::<i128>()
                .map_err(|e| malformed(&e.to_string()))?;
            StoredValue::BigInt(n)
        }
        TAG_DATE => {
            let text = payload.as_str().ok_or_else(|| malformed("expected a string"))?;
            let at = DateTime::parse_from_rfc3339(text).map_err(|e| malformed(&e.to_string()))?;
            StoredValue::date(at.with_timezone(&Utc))
        }
        TAG_MAP => {
            let pairs = payload.as_array().ok_or_else(|| malformed("expected an array"))?;
            let mut entries = Vec::with_capacity(pairs.len());
            for pair in pairs {
                match pair.as_array().map(Vec::as_slice) {
                    Some([k, v]) => entries.push((
                        StoredValue::from_json(k.clone())?,
                        StoredValue::from_json(v.clone())?,
                    )),
                    _ => return Err(malformed("expected [key, value] pairs")),
                }
            }
            StoredValue::Map(entries)
        }
        TAG_SET => {
            let items = payload.as_array().ok_or_else(|| malformed("expected an array"))?;
            StoredValue::set(
                items
                    .iter()
                    .cloned()
                    .map(StoredValue::from_json)
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Encode a value to its wire text.
pub fn encode(value: &StoredValue) -> Result<String> {
    let json = value.to_json()?;
    serde_json::to_string(&json).map_err(|e| StateError::Serialization(e.to_string()))
}

/// Decode wire text produced by [`encode`].
pub fn decode(text: &str) -> Result<StoredValue> {
    let json: JsonValue =
        serde_json::from_str(text).map_err(|e| StateError::Deserialization(e.to_string()))?;
    StoredValue::from_json(json)
}

impl From<bool> for StoredValue {
    fn from(b: bool) -> Self {
        StoredValue::Bool(b)
    }
}

impl From<&str> for StoredValue {
    fn from(s: &str) -> Self {
        StoredValue::String(s.to_string())
    }
}

impl From<String> for StoredValue {
    fn from(s: String) -> Self {
        StoredValue::String(s)
    }
}

impl From<i64> for StoredValue {
    fn from(n: i64) -> Self {
        StoredValue::Number(n.into())
    }
}

impl From<u64> for StoredValue {
    fn from(n: u64) -> Self {
        StoredValue::Number(n.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`, as `JSON.stringify` does.
impl From<f64> for StoredValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n)
            .map(StoredValue::Number)
            .unwrap_or(StoredValue::Null)
    }
}

impl From<Vec<StoredValue>> for StoredValue {
    fn from(items: Vec<StoredValue>) -> Self {
        StoredValue::Array(items)
    }
}

impl From<BTreeMap<String, StoredValue>> for StoredValue {
    fn from(fields: BTreeMap<String, StoredValue>) -> Self {
        StoredValue::Object(fields)
    }
}

impl From<DateTime<Utc>> for StoredValue {
    fn from(at: DateTime<Utc>) -> Self {
        StoredValue::date(at)
    }
}

impl From<i128> for StoredValue {
    fn from(n: i128) -> Self {
        StoredValue::BigInt(n)
    }
}
