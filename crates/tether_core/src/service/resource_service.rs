//! Resource use-case service.
//!
//! # Responsibility
//! - Provide create/get/list/patch/delete entry points per resource kind.
//! - Route every link change and delete cleanup through `LinkService`.
//!
//! # Invariants
//! - New records start unlinked: collections empty, references null.
//! - Unique fields (ship `name`, slip `number`) stay unique per kind; dog
//!   names stay unique per owner.
//! - Deleting a record clears the references other records hold to it.

use crate::config::{CoreConfig, MAX_PAGE_SIZE};
use crate::model::kind::{IdPolicy, ResourceKind};
use crate::model::patch::{Draft, Patch, PatchError};
use crate::model::record::{EntityId, Fields, Record};
use crate::model::relation::{LinkLayout, Relation};
use crate::repo::entity_repo::{EntityListQuery, EntityPage, EntityStore, FieldFilter, StoreError};
use crate::service::link_service::{CascadeReport, LinkError, LinkService, Linked};
use log::info;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors from resource operations.
#[derive(Debug)]
pub enum ResourceError {
    /// Target record does not exist.
    NotFound { kind: ResourceKind, id: EntityId },
    /// Request body failed validation.
    Invalid(PatchError),
    /// Unique field value already taken.
    Duplicate {
        kind: ResourceKind,
        field: &'static str,
        value: String,
    },
    /// Caller may not act on the record.
    Forbidden {
        kind: ResourceKind,
        id: EntityId,
        reason: &'static str,
    },
    /// Kind uses caller-supplied ids and cannot be created generically.
    ExternalId(ResourceKind),
    /// Relationship operation failure.
    Link(LinkError),
    /// Store failure.
    Store(StoreError),
}

impl ResourceError {
    /// Suggested HTTP status for the layer translating this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Invalid(_) | Self::Duplicate { .. } | Self::ExternalId(_) => 400,
            Self::Forbidden { .. } => 403,
            Self::Link(err) => err.status_code(),
            Self::Store(_) => 500,
        }
    }
}

impl Display for ResourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Invalid(err) => write!(f, "{err}"),
            Self::Duplicate { kind, field, value } => {
                write!(f, "{kind} {field} {value} already exists")
            }
            Self::Forbidden { kind, id, reason } => write!(f, "{kind} {id}: {reason}"),
            Self::ExternalId(kind) => write!(f, "{kind} records are keyed by an external id"),
            Self::Link(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::Link(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PatchError> for ResourceError {
    fn from(value: PatchError) -> Self {
        Self::Invalid(value)
    }
}

impl From<StoreError> for ResourceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<LinkError> for ResourceError {
    fn from(value: LinkError) -> Self {
        match value {
            LinkError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Link(other),
        }
    }
}

/// Resource service facade.
pub struct ResourceService<S: EntityStore> {
    links: LinkService<S>,
    page_size: Option<u32>,
}

impl<S: EntityStore> ResourceService<S> {
    pub fn new(store: S, config: &CoreConfig) -> Self {
        Self {
            links: LinkService::new(store, config),
            page_size: config.page_size,
        }
    }

    /// Relationship manager sharing this service's store.
    pub fn links(&self) -> &LinkService<S> {
        &self.links
    }

    fn store(&self) -> &S {
        self.links.store()
    }

    /// Creates one unlinked record of a generated-id kind.
    pub fn create(&self, kind: ResourceKind, body: &Value) -> ResourceResult<Record> {
        if kind.id_policy() == IdPolicy::External {
            return Err(ResourceError::ExternalId(kind));
        }
        let draft = Draft::parse(kind, body)?;
        if let Some(field) = kind.unique_field() {
            self.ensure_unique(kind, field, draft.get(field), None)?;
        }

        let record = self
            .store()
            .put(kind, None, &unlinked_fields(kind, draft.into_fields()))?;
        info!(
            "event=resource_create module=resource status=ok kind={kind} id={}",
            record.id
        );
        Ok(record)
    }

    /// Creates the user record for an identity-provider subject.
    ///
    /// Returns the stored record unchanged when the user already exists.
    pub fn register_user(&self, user_id: &EntityId, body: &Value) -> ResourceResult<Record> {
        let draft = Draft::parse(ResourceKind::User, body)?;
        if let Some(existing) = self.store().get(ResourceKind::User, user_id)? {
            return Ok(existing);
        }
        let fields = unlinked_fields(ResourceKind::User, draft.into_fields());
        let record = self
            .store()
            .put(ResourceKind::User, Some(user_id), &fields)?;
        info!("event=user_register module=resource status=ok id={user_id}");
        Ok(record)
    }

    /// Creates a dog and links it to `owner_id`.
    ///
    /// The dog is written unlinked first, then attached; an attach failure
    /// leaves the unowned dog in place.
    pub fn create_dog(&self, owner_id: &EntityId, body: &Value) -> ResourceResult<Linked> {
        self.get(ResourceKind::User, owner_id)?;
        let draft = Draft::parse(ResourceKind::Dog, body)?;
        self.ensure_dog_name_free(owner_id, draft.get("name"), None)?;

        let dog = self.create(ResourceKind::Dog, body)?;
        Ok(self.links.attach(Relation::UserDog, owner_id, &dog.id)?)
    }

    pub fn get(&self, kind: ResourceKind, id: &EntityId) -> ResourceResult<Record> {
        self.store()
            .get(kind, id)?
            .ok_or_else(|| ResourceError::NotFound {
                kind,
                id: id.clone(),
            })
    }

    /// Lists one page; the page size falls back to config, then to the kind.
    pub fn list(&self, kind: ResourceKind, query: &EntityListQuery) -> ResourceResult<EntityPage> {
        let query = EntityListQuery {
            limit: Some(self.page_limit(kind, query)),
            offset: query.offset,
        };
        Ok(self.store().list(kind, &query)?)
    }

    /// Lists the items `owner_id` holds through `relation`.
    pub fn list_owned(
        &self,
        relation: Relation,
        owner_id: &EntityId,
        query: &EntityListQuery,
    ) -> ResourceResult<EntityPage> {
        let owner = self.get(relation.owner_kind(), owner_id)?;
        let item_kind = relation.item_kind();

        let items = match relation.layout() {
            LinkLayout::OwnerSlot { owner_field, .. } => {
                match owner.field(owner_field).and_then(EntityId::from_value) {
                    Some(item_id) => self.store().get(item_kind, &item_id)?.into_iter().collect(),
                    None => Vec::new(),
                }
            }
            layout => match layout.item_lookup_path() {
                Some(path) => self
                    .store()
                    .query_by_field(item_kind, &FieldFilter::eq(path, owner_id.to_value()))?,
                None => Vec::new(),
            },
        };

        Ok(paginate(items, self.page_limit(item_kind, query), query.offset))
    }

    /// Applies a validated patch to one record.
    pub fn patch(&self, kind: ResourceKind, id: &EntityId, body: &Value) -> ResourceResult<Record> {
        let patch = Patch::parse(kind, body)?;
        let existing = self.get(kind, id)?;

        if let Some(field) = kind.unique_field() {
            self.ensure_unique(kind, field, patch.get(field), Some(id))?;
        }
        if kind == ResourceKind::Dog {
            if let Some(owner_id) = existing.field("owner_id").and_then(EntityId::from_value) {
                self.ensure_dog_name_free(&owner_id, patch.get("name"), Some(id))?;
            }
        }

        let mut fields = existing.fields;
        patch.apply(&mut fields);
        let record = self.store().put(kind, Some(id), &fields)?;
        info!("event=resource_patch module=resource status=ok kind={kind} id={id}");
        Ok(record)
    }

    /// Deletes one record after clearing every reference to it.
    pub fn delete(&self, kind: ResourceKind, id: &EntityId) -> ResourceResult<CascadeReport> {
        self.get(kind, id)?;
        let mut report = self.links.cascade_on_owner_delete(kind, id)?;
        report.merge(self.links.cascade_on_item_delete(kind, id)?);
        info!(
            "event=resource_delete module=resource status={} kind={kind} id={id} cleared={} failures={}",
            if report.is_complete() { "ok" } else { "partial" },
            report.cleared.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Deletes a dog on behalf of `acting_user_id`, who must own it.
    pub fn delete_dog_as(
        &self,
        dog_id: &EntityId,
        acting_user_id: &EntityId,
    ) -> ResourceResult<CascadeReport> {
        let dog = self.get(ResourceKind::Dog, dog_id)?;
        let owner_id = dog.field("owner_id").and_then(EntityId::from_value);
        if owner_id.as_ref() != Some(acting_user_id) {
            info!(
                "event=resource_delete module=resource status=rejected kind=dog id={dog_id} error_code=forbidden"
            );
            return Err(ResourceError::Forbidden {
                kind: ResourceKind::Dog,
                id: dog_id.clone(),
                reason: "only a dog's owner can delete it",
            });
        }
        self.delete(ResourceKind::Dog, dog_id)
    }

    fn page_limit(&self, kind: ResourceKind, query: &EntityListQuery) -> u32 {
        query
            .limit
            .or(self.page_size)
            .unwrap_or_else(|| kind.default_page_size())
            .clamp(1, MAX_PAGE_SIZE)
    }

    fn ensure_unique(
        &self,
        kind: ResourceKind,
        field: &'static str,
        value: Option<&Value>,
        except: Option<&EntityId>,
    ) -> ResourceResult<()> {
        let Some(value) = value.filter(|value| !value.is_null()) else {
            return Ok(());
        };
        let taken = self
            .store()
            .query_by_field(kind, &FieldFilter::eq(field, value.clone()))?
            .into_iter()
            .any(|record| Some(&record.id) != except);
        if taken {
            return Err(ResourceError::Duplicate {
                kind,
                field,
                value: display_value(value),
            });
        }
        Ok(())
    }

    fn ensure_dog_name_free(
        &self,
        owner_id: &EntityId,
        name: Option<&Value>,
        except: Option<&EntityId>,
    ) -> ResourceResult<()> {
        let Some(name) = name.filter(|name| !name.is_null()) else {
            return Ok(());
        };
        let taken = self
            .store()
            .query_by_field(
                ResourceKind::Dog,
                &FieldFilter::eq("owner_id", owner_id.to_value()),
            )?
            .into_iter()
            .any(|dog| dog.field("name") == Some(name) && Some(&dog.id) != except);
        if taken {
            return Err(ResourceError::Duplicate {
                kind: ResourceKind::Dog,
                field: "name",
                value: display_value(name),
            });
        }
        Ok(())
    }
}

/// Adds every link field of `kind` in its unlinked state.
fn unlinked_fields(kind: ResourceKind, mut fields: Fields) -> Fields {
    let collections = Relation::collections_of(kind);
    for field in Relation::link_fields_of(kind) {
        let empty = if collections.contains(&field) {
            Value::Array(Vec::new())
        } else {
            Value::Null
        };
        fields.insert(field.to_string(), empty);
    }
    fields
}

fn paginate(items: Vec<Record>, limit: u32, offset: u32) -> EntityPage {
    let total = items.len();
    let start = (offset as usize).min(total);
    let end = start.saturating_add(limit as usize).min(total);
    let next_offset = (end < total).then(|| offset + limit);
    let items = items.into_iter().skip(start).take(end - start).collect();
    EntityPage { items, next_offset }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
