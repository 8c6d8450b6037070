//! Validated create/update documents.
//!
//! # Responsibility
//! - Name exactly which fields a client may write for each kind.
//! - Merge accepted fields into stored records field by field.
//!
//! # Invariants
//! - `id` and `self` are immutable and rejected at the boundary.
//! - Link fields (`carrier`, `cargo`, `current_boat`, ...) are rejected; they
//!   change only through the relationship manager.
//! - Fields outside `ResourceKind::mutable_fields` are rejected.

use crate::model::kind::ResourceKind;
use crate::model::record::Fields;
use crate::model::relation::Relation;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const IMMUTABLE_FIELDS: &[&str] = &["id", "self"];
const TEXT_FIELDS: &[&str] = &["name", "email"];
const NON_NEGATIVE_FIELDS: &[&str] = &["length", "weight", "age"];

/// Rejection reasons for client-supplied documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Body is not a JSON object.
    NotAnObject,
    /// `id` or `self` was supplied.
    ImmutableField(String),
    /// A relationship field was supplied.
    LinkField(String),
    /// Field is not writable for this kind.
    UnknownField { kind: ResourceKind, field: String },
    /// Required field missing on create.
    MissingField {
        kind: ResourceKind,
        field: &'static str,
    },
    /// Field present with an unusable value.
    InvalidValue {
        field: String,
        reason: &'static str,
    },
}

impl Display for PatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "request body must be a JSON object"),
            Self::ImmutableField(field) => write!(f, "field `{field}` cannot be changed"),
            Self::LinkField(field) => {
                write!(f, "field `{field}` can only change through link operations")
            }
            Self::UnknownField { kind, field } => {
                write!(f, "field `{field}` is not writable on {kind}")
            }
            Self::MissingField { kind, field } => write!(f, "{kind} requires field `{field}`"),
            Self::InvalidValue { field, reason } => write!(f, "field `{field}` {reason}"),
        }
    }
}

impl Error for PatchError {}

/// Partial update of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    kind: ResourceKind,
    fields: Fields,
}

impl Patch {
    pub fn parse(kind: ResourceKind, body: &Value) -> Result<Self, PatchError> {
        let fields = body.as_object().ok_or(PatchError::NotAnObject)?.clone();
        Self::from_fields(kind, fields)
    }

    pub fn from_fields(kind: ResourceKind, fields: Fields) -> Result<Self, PatchError> {
        check_fields(kind, &fields)?;
        for field in kind.required_fields() {
            if matches!(fields.get(*field), Some(Value::Null)) {
                return Err(PatchError::InvalidValue {
                    field: (*field).to_string(),
                    reason: "is required and cannot be cleared",
                });
            }
        }
        Ok(Self { kind, fields })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overwrites each patched field on `target`; untouched fields survive.
    pub fn apply(&self, target: &mut Fields) {
        for (field, value) in &self.fields {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Body of a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    kind: ResourceKind,
    fields: Fields,
}

impl Draft {
    pub fn parse(kind: ResourceKind, body: &Value) -> Result<Self, PatchError> {
        let fields = body.as_object().ok_or(PatchError::NotAnObject)?.clone();
        Self::from_fields(kind, fields)
    }

    pub fn from_fields(kind: ResourceKind, fields: Fields) -> Result<Self, PatchError> {
        check_fields(kind, &fields)?;
        for &field in kind.required_fields() {
            if matches!(fields.get(field), None | Some(Value::Null)) {
                return Err(PatchError::MissingField { kind, field });
            }
        }
        Ok(Self { kind, fields })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

fn check_fields(kind: ResourceKind, fields: &Fields) -> Result<(), PatchError> {
    let link_fields = Relation::link_fields_of(kind);
    for (field, value) in fields {
        if IMMUTABLE_FIELDS.contains(&field.as_str()) {
            return Err(PatchError::ImmutableField(field.clone()));
        }
        if link_fields.contains(&field.as_str()) {
            return Err(PatchError::LinkField(field.clone()));
        }
        if !kind.mutable_fields().contains(&field.as_str()) {
            return Err(PatchError::UnknownField {
                kind,
                field: field.clone(),
            });
        }
        check_value(field, value)?;
    }
    Ok(())
}

fn check_value(field: &str, value: &Value) -> Result<(), PatchError> {
    let invalid = |reason| PatchError::InvalidValue {
        field: field.to_string(),
        reason,
    };
    if value.is_null() {
        return Ok(());
    }
    if TEXT_FIELDS.contains(&field) {
        let text = value.as_str().ok_or_else(|| invalid("must be text"))?;
        if text.trim().is_empty() {
            return Err(invalid("must not be blank"));
        }
    }
    if NON_NEGATIVE_FIELDS.contains(&field) {
        let number = value.as_f64().ok_or_else(|| invalid("must be a number"))?;
        if number < 0.0 {
            return Err(invalid("must not be negative"));
        }
    }
    if field == "number" {
        match value {
            Value::Number(_) => {}
            Value::String(text) if !text.trim().is_empty() => {}
            _ => return Err(invalid("must be a number or non-blank text")),
        }
    }
    if value.is_object() || value.is_array() {
        return Err(invalid("must be a scalar"));
    }
    Ok(())
}
