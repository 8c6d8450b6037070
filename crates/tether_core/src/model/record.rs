//! Entity records, ids and reference stubs.
//!
//! # Invariants
//! - `EntityId` is opaque text; generated ids are decimal integers.
//! - `self` links are derived as `{host}/{route}/{id}` and never trusted
//!   from stored data.
//! - A field that is missing and a field holding `null` are both "unset".

use crate::model::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Kind-specific record fields, kept as a JSON object.
pub type Fields = Map<String, Value>;

/// Opaque record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads an id stored either as JSON text or as a JSON integer.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(Self(text.clone())),
            Value::Number(number) => number
                .as_i64()
                .map(|id| Self(id.to_string()))
                .or_else(|| number.as_u64().map(|id| Self(id.to_string()))),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Derives the canonical `self` link of one record.
pub fn self_link(host: &str, kind: ResourceKind, id: &EntityId) -> String {
    format!("{host}/{}/{id}", kind.route())
}

/// One stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: ResourceKind,
    pub id: EntityId,
    pub fields: Fields,
}

impl Record {
    pub fn new(kind: ResourceKind, id: EntityId, fields: Fields) -> Self {
        Self { kind, id, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns whether `name` is missing or `null`.
    pub fn is_unset(&self, name: &str) -> bool {
        matches!(self.fields.get(name), None | Some(Value::Null))
    }

    /// Returns this record with `name` replaced by `value`.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn self_link(&self, host: &str) -> String {
        self_link(host, self.kind, &self.id)
    }

    /// Builds the stub other records use to reference this one.
    ///
    /// The record's `name` travels with the stub when it is text.
    pub fn stub(&self, host: &str) -> Stub {
        Stub {
            id: self.id.clone(),
            self_link: self.self_link(host),
            name: self
                .field("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Renders the record as the API presents it: fields plus `id` and `self`.
    pub fn to_json(&self, host: &str) -> Value {
        let mut rendered = self.fields.clone();
        rendered.insert("id".to_string(), self.id.to_value());
        rendered.insert("self".to_string(), Value::String(self.self_link(host)));
        Value::Object(rendered)
    }
}

/// Minimal `{id, self}` reference stored inside another record.
///
/// Rendered by `to_value` as `{"id", "name"?, "self"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stub {
    pub id: EntityId,
    pub self_link: String,
    pub name: Option<String>,
}

impl Stub {
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".to_string(), self.id.to_value());
        if let Some(name) = &self.name {
            object.insert("name".to_string(), Value::String(name.clone()));
        }
        object.insert("self".to_string(), Value::String(self.self_link.clone()));
        Value::Object(object)
    }

    /// Parses a stored stub. Stubs written by older clients may lack `self`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let id = EntityId::from_value(object.get("id")?)?;
        Some(Self {
            id,
            self_link: object
                .get("self")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: object
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Reads the `id` of a stored stub without parsing the rest.
    pub fn id_of(value: &Value) -> Option<EntityId> {
        value.get("id").and_then(EntityId::from_value)
    }
}
