//! Relationship manager.
//!
//! # Responsibility
//! - Create and remove two-way links between independently stored records.
//! - Clean up references when either side of a relation is deleted.
//!
//! # Invariants
//! - Attach never overwrites an existing owner reference.
//! - Detach only acts on links the owner actually lists, and never clears a
//!   reference that points at another owner.
//! - Cascades null references; they never delete the referencing record.
//!
//! # Write policy
//! Every store write of a chain is attempted in order. In
//! `ConsistencyMode::BestEffort` a failed write does not stop later writes
//! and no earlier write is undone: attach/detach report the first failure,
//! cascades collect failures in `CascadeReport::failures`. In
//! `ConsistencyMode::AllOrNothing` the chain runs through
//! `EntityStore::atomically` and the first failure rolls the chain back.
//!
//! Reads and writes are not guarded by any version check, so two concurrent
//! attaches of the same item can both pass the unlinked check and leave a
//! double link behind.

use crate::config::{ConsistencyMode, CoreConfig};
use crate::model::kind::ResourceKind;
use crate::model::record::{EntityId, Fields, Record, Stub};
use crate::model::relation::{LinkLayout, Relation};
use crate::repo::entity_repo::{EntityStore, FieldFilter, StoreError, StoreResult};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type LinkResult<T> = Result<T, LinkError>;

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// Owner or item is absent, or the link does not exist. Client error.
    NotFound,
    /// Item already has an owner. Client error.
    AlreadyLinked,
    /// Underlying store call failed. Server error.
    StoreWriteFailed,
}

/// Errors from relationship operations.
#[derive(Debug)]
pub enum LinkError {
    /// Owner or item record does not exist.
    NotFound { kind: ResourceKind, id: EntityId },
    /// Owner does not list the item.
    NotLinked {
        relation: Relation,
        owner_id: EntityId,
        item_id: EntityId,
    },
    /// Record named by `kind`/`id` already takes part in `relation`.
    AlreadyLinked {
        relation: Relation,
        kind: ResourceKind,
        id: EntityId,
    },
    /// Store read or write failure.
    Store(StoreError),
}

impl LinkError {
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            Self::NotFound { .. } | Self::NotLinked { .. } => LinkErrorKind::NotFound,
            Self::AlreadyLinked { .. } => LinkErrorKind::AlreadyLinked,
            Self::Store(_) => LinkErrorKind::StoreWriteFailed,
        }
    }

    /// Suggested HTTP status for the layer translating this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            LinkErrorKind::NotFound => 404,
            LinkErrorKind::AlreadyLinked => 403,
            LinkErrorKind::StoreWriteFailed => 500,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NotLinked { .. } => "not_linked",
            Self::AlreadyLinked { .. } => "already_linked",
            Self::Store(_) => "store_failed",
        }
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::NotLinked {
                relation,
                owner_id,
                item_id,
            } => write!(
                f,
                "{} {item_id} is not linked to {} {owner_id}",
                relation.item_kind(),
                relation.owner_kind()
            ),
            Self::AlreadyLinked { relation, kind, id } => {
                write!(f, "{kind} {id} is already linked through {relation}")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Records as written by a successful attach.
#[derive(Debug, Clone, PartialEq)]
pub struct Linked {
    pub owner: Record,
    pub item: Record,
}

/// Records as written by a successful detach.
///
/// `item` is `None` when the listed item no longer exists. An item whose
/// reference points at a different owner is returned unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Unlinked {
    pub owner: Record,
    pub item: Option<Record>,
}

/// One secondary write that failed during a cascade.
#[derive(Debug)]
pub struct CascadeFailure {
    pub kind: ResourceKind,
    pub id: EntityId,
    pub error: StoreError,
}

/// Outcome of a cascade.
#[derive(Debug, Default)]
pub struct CascadeReport {
    /// Records whose reference to the deleted record was removed.
    pub cleared: Vec<(ResourceKind, EntityId)>,
    /// Secondary reads or writes that failed; processing continued past them.
    pub failures: Vec<CascadeFailure>,
    /// Whether the cascade itself deleted the record.
    pub deleted: bool,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: CascadeReport) {
        self.cleared.extend(other.cleared);
        self.failures.extend(other.failures);
        self.deleted |= other.deleted;
    }
}

enum Write {
    Put(Record),
    Delete(ResourceKind, EntityId),
}

impl Write {
    fn target(&self) -> (ResourceKind, &EntityId) {
        match self {
            Self::Put(record) => (record.kind, &record.id),
            Self::Delete(kind, id) => (*kind, id),
        }
    }

    fn apply<S: EntityStore>(&self, store: &S) -> StoreResult<()> {
        match self {
            Self::Put(record) => store
                .put(record.kind, Some(&record.id), &record.fields)
                .map(|_| ()),
            Self::Delete(kind, id) => store.delete(*kind, id),
        }
    }
}

/// Relationship manager over one entity store.
pub struct LinkService<S: EntityStore> {
    store: S,
    host_name: String,
    mode: ConsistencyMode,
}

impl<S: EntityStore> LinkService<S> {
    /// Creates the manager. `AllOrNothing` falls back to `BestEffort` when
    /// the store cannot roll back.
    pub fn new(store: S, config: &CoreConfig) -> Self {
        let mut mode = config.consistency;
        if mode == ConsistencyMode::AllOrNothing && !store.supports_atomic() {
            warn!(
                "event=link_config module=link status=degraded requested={} effective={}",
                mode.as_str(),
                ConsistencyMode::BestEffort.as_str()
            );
            mode = ConsistencyMode::BestEffort;
        }
        Self {
            store,
            host_name: config.host_name.clone(),
            mode,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    /// Links `item_id` to `owner_id` through `relation`.
    ///
    /// # Errors
    /// - `NotFound` when either record is absent.
    /// - `AlreadyLinked` when the item already has an owner (or, for a slot
    ///   relation, the slot is taken); no write is attempted.
    /// - `Store` with the first failed write.
    pub fn attach(
        &self,
        relation: Relation,
        owner_id: &EntityId,
        item_id: &EntityId,
    ) -> LinkResult<Linked> {
        let op_id = Uuid::new_v4();
        let result = self.attach_inner(relation, owner_id, item_id, &Fields::new(), op_id);
        log_outcome("link_attach", relation, owner_id, item_id, op_id, &result);
        result
    }

    /// Moors `ship_id` at `slip_id`, recording the arrival date.
    pub fn dock(
        &self,
        slip_id: &EntityId,
        ship_id: &EntityId,
        arrival_date: &str,
    ) -> LinkResult<Linked> {
        let op_id = Uuid::new_v4();
        let mut companions = Fields::new();
        companions.insert(
            "arrival_date".to_string(),
            Value::String(arrival_date.to_string()),
        );
        let result = self.attach_inner(Relation::SlipShip, slip_id, ship_id, &companions, op_id);
        log_outcome("link_dock", Relation::SlipShip, slip_id, ship_id, op_id, &result);
        result
    }

    /// Removes the link between `owner_id` and `item_id`.
    ///
    /// The item's reference is cleared only while it still points at
    /// `owner_id`; a stale stub is dropped from the owner either way.
    ///
    /// # Errors
    /// - `NotFound` when the owner is absent.
    /// - `NotLinked` when the owner does not list the item; nothing changes.
    /// - `Store` with the first failed write.
    pub fn detach(
        &self,
        relation: Relation,
        owner_id: &EntityId,
        item_id: &EntityId,
    ) -> LinkResult<Unlinked> {
        let op_id = Uuid::new_v4();
        let result = self.detach_inner(relation, owner_id, item_id, op_id);
        log_outcome("link_detach", relation, owner_id, item_id, op_id, &result);
        result
    }

    /// Clears every reference other records hold to `kind`/`id` before it is
    /// deleted by the caller.
    ///
    /// Collection owners null the owner reference of each listed item that
    /// still points at them. Records held in a slot are released from every
    /// slot found by reverse query.
    pub fn cascade_on_owner_delete(
        &self,
        kind: ResourceKind,
        id: &EntityId,
    ) -> LinkResult<CascadeReport> {
        let op_id = Uuid::new_v4();
        let record = self.require(kind, id)?;
        let mut report = CascadeReport::default();
        let mut writes = Vec::new();

        for relation in Relation::ALL {
            match relation.layout() {
                LinkLayout::StubPair {
                    item_field,
                    collection,
                }
                | LinkLayout::IndexedPair {
                    item_field,
                    collection,
                } if relation.owner_kind() == kind => {
                    for entry in collection_entries(&record, collection)? {
                        let Some(item_id) = Stub::id_of(&entry) else {
                            warn!(
                                "event=cascade_owner_delete module=link status=skipped reason=malformed_stub kind={kind} id={id} op_id={op_id}"
                            );
                            continue;
                        };
                        let item_kind = relation.item_kind();
                        let Some(item) = self.read_tolerant(item_kind, &item_id, &mut report)?
                        else {
                            continue;
                        };
                        if references_owner(relation, &item, id) {
                            writes.push(Write::Put(item.with_field(item_field, Value::Null)));
                        } else {
                            debug!(
                                "event=cascade_owner_delete module=link status=skipped reason=foreign_owner kind={item_kind} id={item_id} op_id={op_id}"
                            );
                        }
                    }
                }
                LinkLayout::OwnerSlot {
                    owner_field,
                    companions,
                } if relation.item_kind() == kind => {
                    for holder in self.holders(relation, id)? {
                        writes.push(Write::Put(clear_slot(holder, owner_field, companions)));
                    }
                }
                _ => {}
            }
        }

        self.run_cascade("cascade_owner_delete", kind, id, op_id, writes, None, &mut report)?;
        Ok(report)
    }

    /// Removes `kind`/`id` from its owners' collections, then deletes it.
    ///
    /// A failed owner update does not stop the delete; it is reported in
    /// `CascadeReport::failures`. A missing record is deleted as a no-op.
    pub fn cascade_on_item_delete(
        &self,
        kind: ResourceKind,
        id: &EntityId,
    ) -> LinkResult<CascadeReport> {
        let op_id = Uuid::new_v4();
        let mut report = CascadeReport::default();
        let mut writes = Vec::new();

        if let Some(item) = self.store.get(kind, id)? {
            for relation in Relation::ALL
                .into_iter()
                .filter(|relation| relation.item_kind() == kind)
            {
                let (Some(owner_id), Some(collection)) = (
                    owner_reference(relation, &item),
                    relation.layout().collection(),
                ) else {
                    continue;
                };
                let owner_kind = relation.owner_kind();
                let Some(owner) = self.read_tolerant(owner_kind, &owner_id, &mut report)? else {
                    warn!(
                        "event=cascade_item_delete module=link status=skipped reason=dangling_owner kind={owner_kind} id={owner_id} op_id={op_id}"
                    );
                    continue;
                };
                let entries = collection_entries(&owner, collection)?;
                let remaining = without_stub(&entries, id);
                if remaining.len() != entries.len() {
                    writes.push(Write::Put(
                        owner.with_field(collection, Value::Array(remaining)),
                    ));
                }
            }
        }

        let delete = Write::Delete(kind, id.clone());
        self.run_cascade(
            "cascade_item_delete",
            kind,
            id,
            op_id,
            writes,
            Some(delete),
            &mut report,
        )?;
        Ok(report)
    }

    fn attach_inner(
        &self,
        relation: Relation,
        owner_id: &EntityId,
        item_id: &EntityId,
        companions: &Fields,
        op_id: Uuid,
    ) -> LinkResult<Linked> {
        let owner = self.require(relation.owner_kind(), owner_id)?;
        let item = self.require(relation.item_kind(), item_id)?;

        let (owner, item, writes) = match relation.layout() {
            LinkLayout::StubPair {
                item_field,
                collection,
            } => {
                ensure_unlinked(relation, &item, item_field)?;
                let reference = owner.stub(&self.host_name).to_value();
                let entries = with_stub(&owner, collection, item.stub(&self.host_name))?;
                let item = item.with_field(item_field, reference);
                let owner = owner.with_field(collection, entries);
                let writes = vec![Write::Put(item.clone()), Write::Put(owner.clone())];
                (owner, item, writes)
            }
            LinkLayout::IndexedPair {
                item_field,
                collection,
            } => {
                ensure_unlinked(relation, &item, item_field)?;
                let entries = with_stub(&owner, collection, item.stub(&self.host_name))?;
                let item = item.with_field(item_field, owner.id.to_value());
                let owner = owner.with_field(collection, entries);
                let writes = vec![Write::Put(item.clone()), Write::Put(owner.clone())];
                (owner, item, writes)
            }
            LinkLayout::OwnerSlot { owner_field, .. } => {
                if !owner.is_unset(owner_field) {
                    return Err(LinkError::AlreadyLinked {
                        relation,
                        kind: owner.kind,
                        id: owner.id,
                    });
                }
                if !self.holders(relation, item_id)?.is_empty() {
                    return Err(LinkError::AlreadyLinked {
                        relation,
                        kind: item.kind,
                        id: item.id,
                    });
                }
                let mut owner = owner.with_field(owner_field, item.id.to_value());
                for (field, value) in companions {
                    owner.fields.insert(field.clone(), value.clone());
                }
                let writes = vec![Write::Put(owner.clone())];
                (owner, item, writes)
            }
        };

        self.run_chain("link_attach", op_id, writes)?;
        Ok(Linked { owner, item })
    }

    fn detach_inner(
        &self,
        relation: Relation,
        owner_id: &EntityId,
        item_id: &EntityId,
        op_id: Uuid,
    ) -> LinkResult<Unlinked> {
        let owner = self.require(relation.owner_kind(), owner_id)?;
        let not_linked = || LinkError::NotLinked {
            relation,
            owner_id: owner_id.clone(),
            item_id: item_id.clone(),
        };

        match relation.layout() {
            LinkLayout::StubPair {
                item_field,
                collection,
            }
            | LinkLayout::IndexedPair {
                item_field,
                collection,
            } => {
                let entries = collection_entries(&owner, collection)?;
                let remaining = without_stub(&entries, item_id);
                if remaining.len() == entries.len() {
                    return Err(not_linked());
                }

                let owner = owner.with_field(collection, Value::Array(remaining));
                let item_kind = relation.item_kind();
                let mut writes = vec![Write::Put(owner.clone())];
                let item = match self.store.get(item_kind, item_id)? {
                    Some(item) if references_owner(relation, &item, owner_id) => {
                        let item = item.with_field(item_field, Value::Null);
                        writes.push(Write::Put(item.clone()));
                        Some(item)
                    }
                    Some(item) => {
                        warn!(
                            "event=link_detach module=link status=partial reason=foreign_owner kind={item_kind} id={item_id} op_id={op_id}"
                        );
                        Some(item)
                    }
                    None => {
                        warn!(
                            "event=link_detach module=link status=partial reason=item_missing kind={item_kind} id={item_id} op_id={op_id}"
                        );
                        None
                    }
                };

                self.run_chain("link_detach", op_id, writes)?;
                Ok(Unlinked { owner, item })
            }
            LinkLayout::OwnerSlot {
                owner_field,
                companions,
            } => {
                let held = owner.field(owner_field).and_then(EntityId::from_value);
                if held.as_ref() != Some(item_id) {
                    return Err(not_linked());
                }

                let item = self.store.get(relation.item_kind(), item_id)?;
                let owner = clear_slot(owner, owner_field, companions);
                self.run_chain("link_detach", op_id, vec![Write::Put(owner.clone())])?;
                Ok(Unlinked { owner, item })
            }
        }
    }

    fn require(&self, kind: ResourceKind, id: &EntityId) -> LinkResult<Record> {
        self.store
            .get(kind, id)?
            .ok_or_else(|| LinkError::NotFound {
                kind,
                id: id.clone(),
            })
    }

    /// Slot owners currently holding `item_id`.
    fn holders(&self, relation: Relation, item_id: &EntityId) -> LinkResult<Vec<Record>> {
        match relation.layout() {
            LinkLayout::OwnerSlot { owner_field, .. } => Ok(self.store.query_by_field(
                relation.owner_kind(),
                &FieldFilter::eq(owner_field, item_id.to_value()),
            )?),
            LinkLayout::StubPair { .. } | LinkLayout::IndexedPair { .. } => Ok(Vec::new()),
        }
    }

    /// Reads one record during a cascade; in best-effort mode a failed read
    /// is reported and treated as absent.
    fn read_tolerant(
        &self,
        kind: ResourceKind,
        id: &EntityId,
        report: &mut CascadeReport,
    ) -> LinkResult<Option<Record>> {
        match self.store.get(kind, id) {
            Ok(found) => Ok(found),
            Err(err) if self.mode == ConsistencyMode::BestEffort => {
                warn!(
                    "event=cascade_read module=link status=partial kind={kind} id={id} error={err}"
                );
                report.failures.push(CascadeFailure {
                    kind,
                    id: id.clone(),
                    error: err,
                });
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Runs attach/detach writes; returns the first failure.
    fn run_chain(&self, event: &'static str, op_id: Uuid, writes: Vec<Write>) -> LinkResult<()> {
        if self.mode == ConsistencyMode::AllOrNothing {
            return self.store.atomically(|store| {
                for write in &writes {
                    write.apply(store)?;
                }
                Ok(())
            });
        }

        let total = writes.len();
        let mut first_failure = None;
        for (index, write) in writes.iter().enumerate() {
            if let Err(err) = write.apply(&self.store) {
                let (kind, id) = write.target();
                warn!(
                    "event={event} module=link status=partial write={}/{total} kind={kind} id={id} op_id={op_id} error={err}",
                    index + 1
                );
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Runs cascade writes. Secondary failures land in `report`; the primary
    /// write, when given, runs last and its failure is returned.
    #[allow(clippy::too_many_arguments)]
    fn run_cascade(
        &self,
        event: &'static str,
        kind: ResourceKind,
        id: &EntityId,
        op_id: Uuid,
        writes: Vec<Write>,
        primary: Option<Write>,
        report: &mut CascadeReport,
    ) -> LinkResult<()> {
        if self.mode == ConsistencyMode::AllOrNothing {
            self.store.atomically(|store| -> LinkResult<()> {
                for write in writes.iter().chain(primary.iter()) {
                    write.apply(store)?;
                }
                Ok(())
            })?;
            report.cleared.extend(writes.iter().map(cleared_entry));
            report.deleted = primary.is_some();
        } else {
            for write in &writes {
                match write.apply(&self.store) {
                    Ok(()) => report.cleared.push(cleared_entry(write)),
                    Err(err) => {
                        let (target_kind, target_id) = write.target();
                        warn!(
                            "event={event} module=link status=partial kind={target_kind} id={target_id} op_id={op_id} error={err}"
                        );
                        report.failures.push(CascadeFailure {
                            kind: target_kind,
                            id: target_id.clone(),
                            error: err,
                        });
                    }
                }
            }
            if let Some(primary) = &primary {
                if let Err(err) = primary.apply(&self.store) {
                    error!(
                        "event={event} module=link status=error kind={kind} id={id} op_id={op_id} error_code=primary_write_failed error={err}"
                    );
                    return Err(err.into());
                }
                report.deleted = true;
            }
        }

        info!(
            "event={event} module=link status={} kind={kind} id={id} cleared={} failures={} op_id={op_id}",
            if report.is_complete() { "ok" } else { "partial" },
            report.cleared.len(),
            report.failures.len()
        );
        Ok(())
    }
}

fn log_outcome<T>(
    event: &'static str,
    relation: Relation,
    owner_id: &EntityId,
    item_id: &EntityId,
    op_id: Uuid,
    result: &LinkResult<T>,
) {
    match result {
        Ok(_) => info!(
            "event={event} module=link status=ok relation={relation} owner_id={owner_id} item_id={item_id} op_id={op_id}"
        ),
        Err(err @ LinkError::Store(_)) => error!(
            "event={event} module=link status=error relation={relation} owner_id={owner_id} item_id={item_id} op_id={op_id} error_code={} error={err}",
            err.code()
        ),
        Err(err) => info!(
            "event={event} module=link status=rejected relation={relation} owner_id={owner_id} item_id={item_id} op_id={op_id} error_code={}",
            err.code()
        ),
    }
}

fn cleared_entry(write: &Write) -> (ResourceKind, EntityId) {
    let (kind, id) = write.target();
    (kind, id.clone())
}

fn ensure_unlinked(relation: Relation, item: &Record, item_field: &str) -> LinkResult<()> {
    if item.is_unset(item_field) {
        return Ok(());
    }
    Err(LinkError::AlreadyLinked {
        relation,
        kind: item.kind,
        id: item.id.clone(),
    })
}

/// Owner id an item currently points at, for pair layouts.
fn owner_reference(relation: Relation, item: &Record) -> Option<EntityId> {
    match relation.layout() {
        LinkLayout::StubPair { item_field, .. } => item.field(item_field).and_then(Stub::id_of),
        LinkLayout::IndexedPair { item_field, .. } => {
            item.field(item_field).and_then(EntityId::from_value)
        }
        LinkLayout::OwnerSlot { .. } => None,
    }
}

fn references_owner(relation: Relation, item: &Record, owner_id: &EntityId) -> bool {
    owner_reference(relation, item).as_ref() == Some(owner_id)
}

fn collection_entries(record: &Record, collection: &str) -> LinkResult<Vec<Value>> {
    match record.field(collection) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(_) => Err(LinkError::Store(StoreError::InvalidData(format!(
            "{} {} field `{collection}` is not a list",
            record.kind, record.id
        )))),
    }
}

fn without_stub(entries: &[Value], id: &EntityId) -> Vec<Value> {
    entries
        .iter()
        .filter(|entry| Stub::id_of(entry).as_ref() != Some(id))
        .cloned()
        .collect()
}

/// Owner collection with `stub` appended, replacing any stale stub for the
/// same id.
fn with_stub(owner: &Record, collection: &str, stub: Stub) -> LinkResult<Value> {
    let mut entries = without_stub(&collection_entries(owner, collection)?, &stub.id);
    entries.push(stub.to_value());
    Ok(Value::Array(entries))
}

fn clear_slot(holder: Record, owner_field: &str, companions: &[&str]) -> Record {
    let mut holder = holder.with_field(owner_field, Value::Null);
    for field in companions {
        holder.fields.insert((*field).to_string(), Value::Null);
    }
    holder
}
