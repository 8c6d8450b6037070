//! Entity store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist records as JSON objects keyed by `(kind, entity_id)`.
//! - Allocate ids for generated-id kinds.
//! - Answer reverse lookups on dotted field paths.
//!
//! # Invariants
//! - Listing and queries return records in insertion order.
//! - Field paths are validated before they reach SQL.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::kind::{IdPolicy, ResourceKind};
use crate::model::record::{EntityId, Fields, Record};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid field path regex")
});

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from entity store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// A kind with external ids was written without one.
    MissingId(ResourceKind),
    /// Query filter cannot be executed.
    InvalidQuery(String),
    /// Persisted or supplied data has an unusable shape.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingId(kind) => write!(f, "{kind} records require a caller-supplied id"),
            Self::InvalidQuery(message) => write!(f, "invalid entity query: {message}"),
            Self::InvalidData(message) => write!(f, "invalid entity data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl QueryOp {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// `field op value` filter over record fields.
///
/// `field` is a dotted path into the record, e.g. `carrier.id`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: QueryOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: QueryOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, QueryOp::Eq, value)
    }

    fn json_path(&self) -> StoreResult<String> {
        if !FIELD_PATH_RE.is_match(&self.field) {
            return Err(StoreError::InvalidQuery(format!(
                "unsupported field path `{}`",
                self.field
            )));
        }
        Ok(format!("$.{}", self.field))
    }
}

/// Page options for listing one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityListQuery {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One page of records.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPage {
    pub items: Vec<Record>,
    /// Offset of the next page, when more records remain.
    pub next_offset: Option<u32>,
}

/// Record-level persistence contract.
pub trait EntityStore {
    /// Loads one record, `None` when absent.
    fn get(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<Option<Record>>;
    /// Writes the full field set of one record and returns it.
    ///
    /// Without `id`, a new id is allocated for generated-id kinds.
    fn put(&self, kind: ResourceKind, id: Option<&EntityId>, fields: &Fields)
        -> StoreResult<Record>;
    /// Removes one record. Missing ids succeed.
    fn delete(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<()>;
    /// Returns every record of `kind` matching `filter`.
    fn query_by_field(&self, kind: ResourceKind, filter: &FieldFilter) -> StoreResult<Vec<Record>>;
    /// Returns one page of records of `kind`.
    fn list(&self, kind: ResourceKind, query: &EntityListQuery) -> StoreResult<EntityPage>;

    /// Runs `op` as one all-or-nothing unit when the store supports it.
    ///
    /// The default runs `op` directly, so earlier writes survive a later
    /// failure.
    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        op(self)
    }

    /// Whether `atomically` actually rolls back on failure.
    fn supports_atomic(&self) -> bool {
        false
    }
}

impl<S: EntityStore> EntityStore for &S {
    fn get(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<Option<Record>> {
        (**self).get(kind, id)
    }

    fn put(
        &self,
        kind: ResourceKind,
        id: Option<&EntityId>,
        fields: &Fields,
    ) -> StoreResult<Record> {
        (**self).put(kind, id, fields)
    }

    fn delete(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<()> {
        (**self).delete(kind, id)
    }

    fn query_by_field(&self, kind: ResourceKind, filter: &FieldFilter) -> StoreResult<Vec<Record>> {
        (**self).query_by_field(kind, filter)
    }

    fn list(&self, kind: ResourceKind, query: &EntityListQuery) -> StoreResult<EntityPage> {
        (**self).list(kind, query)
    }

    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).atomically(|_| op(self))
    }

    fn supports_atomic(&self) -> bool {
        (**self).supports_atomic()
    }
}

/// SQLite-backed entity store.
pub struct SqliteEntityStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityStore<'conn> {
    /// Creates a store over a connection returned by `open_db*`.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        let actual_version = current_user_version(conn)?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(StoreError::InvalidData(format!(
                "entity store requires schema version {expected_version}, got {actual_version}"
            )));
        }
        Ok(Self { conn })
    }

    fn allocate_id(&self, kind: ResourceKind) -> StoreResult<EntityId> {
        self.conn.execute(
            "INSERT INTO entity_keys (kind) VALUES (?1);",
            [kind.as_str()],
        )?;
        Ok(EntityId::from(self.conn.last_insert_rowid()))
    }
}

impl EntityStore for SqliteEntityStore<'_> {
    fn get(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<Option<Record>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM entities WHERE kind = ?1 AND entity_id = ?2;",
                params![kind.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(text) => Ok(Some(Record::new(kind, id.clone(), parse_fields(&text)?))),
            None => Ok(None),
        }
    }

    fn put(
        &self,
        kind: ResourceKind,
        id: Option<&EntityId>,
        fields: &Fields,
    ) -> StoreResult<Record> {
        let id = match (id, kind.id_policy()) {
            (Some(id), _) => id.clone(),
            (None, IdPolicy::Generated) => self.allocate_id(kind)?,
            (None, IdPolicy::External) => return Err(StoreError::MissingId(kind)),
        };
        if id.as_str().trim().is_empty() {
            return Err(StoreError::InvalidData(format!("blank {kind} id")));
        }

        let data = serde_json::to_string(fields)
            .map_err(|err| StoreError::InvalidData(format!("unserializable fields: {err}")))?;
        self.conn.execute(
            "INSERT INTO entities (kind, entity_id, data)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (kind, entity_id) DO UPDATE SET
                data = excluded.data,
                updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000);",
            params![kind.as_str(), id.as_str(), data],
        )?;
        debug!("event=entity_put module=repo status=ok kind={kind} id={id}");

        Ok(Record::new(kind, id, fields.clone()))
    }

    fn delete(&self, kind: ResourceKind, id: &EntityId) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM entities WHERE kind = ?1 AND entity_id = ?2;",
            params![kind.as_str(), id.as_str()],
        )?;
        debug!("event=entity_delete module=repo status=ok kind={kind} id={id} changed={changed}");
        Ok(())
    }

    fn query_by_field(&self, kind: ResourceKind, filter: &FieldFilter) -> StoreResult<Vec<Record>> {
        let path = filter.json_path()?;
        let mut bind_values = vec![
            SqlValue::Text(kind.as_str().to_string()),
            SqlValue::Text(path),
        ];

        let predicate = match (&filter.value, filter.op) {
            (Value::Null, QueryOp::Eq) => "json_extract(data, ?2) IS NULL".to_string(),
            (Value::Null, QueryOp::Ne) => "json_extract(data, ?2) IS NOT NULL".to_string(),
            (Value::Null, op) => {
                return Err(StoreError::InvalidQuery(format!(
                    "operator `{}` cannot compare against null",
                    op.as_sql()
                )));
            }
            (value, op) => {
                bind_values.push(scalar_to_sql(value)?);
                format!("json_extract(data, ?2) {} ?3", op.as_sql())
            }
        };

        let sql = format!(
            "SELECT entity_id, data FROM entities
             WHERE kind = ?1 AND {predicate}
             ORDER BY rowid ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(kind, row)?);
        }
        Ok(records)
    }

    fn list(&self, kind: ResourceKind, query: &EntityListQuery) -> StoreResult<EntityPage> {
        // Fetch one extra row to learn whether another page exists.
        let fetch_limit = query.limit.map_or(-1, |limit| i64::from(limit) + 1);
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, data FROM entities
             WHERE kind = ?1
             ORDER BY rowid ASC
             LIMIT ?2 OFFSET ?3;",
        )?;
        let mut rows = stmt.query(params![
            kind.as_str(),
            fetch_limit,
            i64::from(query.offset)
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_record_row(kind, row)?);
        }

        let next_offset = match query.limit {
            Some(limit) if items.len() > limit as usize => {
                items.truncate(limit as usize);
                Some(query.offset + limit)
            }
            _ => None,
        };
        Ok(EntityPage { items, next_offset })
    }

    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|err| E::from(StoreError::from(err)))?;
        // Dropping `tx` without commit rolls back every write made by `op`.
        let value = op(self)?;
        tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
        Ok(value)
    }

    fn supports_atomic(&self) -> bool {
        true
    }
}

fn parse_record_row(kind: ResourceKind, row: &Row<'_>) -> StoreResult<Record> {
    let id: String = row.get("entity_id")?;
    let data: String = row.get("data")?;
    Ok(Record::new(kind, EntityId::new(id), parse_fields(&data)?))
}

fn parse_fields(data: &str) -> StoreResult<Fields> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(StoreError::InvalidData(
            "entities.data is not a JSON object".to_string(),
        )),
        Err(err) => Err(StoreError::InvalidData(format!(
            "entities.data is not valid JSON: {err}"
        ))),
    }
}

fn scalar_to_sql(value: &Value) -> StoreResult<SqlValue> {
    match value {
        Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .ok_or_else(|| StoreError::InvalidQuery(format!("unsupported number `{number}`"))),
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidQuery(
            "filter value must be a scalar".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldFilter, QueryOp};
    use serde_json::json;

    #[test]
    fn query_op_parses_datastore_style_operators() {
        assert_eq!(QueryOp::parse("="), Some(QueryOp::Eq));
        assert_eq!(QueryOp::parse(" >= "), Some(QueryOp::Ge));
        assert_eq!(QueryOp::parse("<>"), Some(QueryOp::Ne));
        assert_eq!(QueryOp::parse("~"), None);
    }

    #[test]
    fn field_paths_are_validated() {
        assert_eq!(
            FieldFilter::eq("carrier.id", json!("1")).json_path().unwrap(),
            "$.carrier.id"
        );
        assert!(FieldFilter::eq("carrier..id", json!("1")).json_path().is_err());
        assert!(FieldFilter::eq("x') OR 1=1 --", json!("1")).json_path().is_err());
        assert!(FieldFilter::eq("", json!("1")).json_path().is_err());
    }
}
