//! Relations between resource kinds.
//!
//! # Responsibility
//! - Name every owner/item pairing the API maintains.
//! - Describe where each side stores its half of the link.
//!
//! # Invariants
//! - An item has at most one owner at a time.
//! - For pair layouts, the item's reference and the owner's collection must
//!   agree; `IndexedPair` items hold a bare owner id used as a query index.
//! - `OwnerSlot` relations are one-to-one and the item keeps no back-reference.

use crate::model::kind::ResourceKind;
use std::fmt::{Display, Formatter};

/// Cardinality seen from the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
}

/// Storage layout of one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayout {
    /// Item field holds an owner stub; owner collection holds item stubs.
    StubPair {
        item_field: &'static str,
        collection: &'static str,
    },
    /// Item field holds the bare owner id; owner collection holds item stubs.
    IndexedPair {
        item_field: &'static str,
        collection: &'static str,
    },
    /// Owner field holds the bare item id, with companion fields cleared
    /// alongside it.
    OwnerSlot {
        owner_field: &'static str,
        companions: &'static [&'static str],
    },
}

impl LinkLayout {
    /// Field on the item pointing at its owner, if the layout has one.
    pub fn item_field(self) -> Option<&'static str> {
        match self {
            Self::StubPair { item_field, .. } | Self::IndexedPair { item_field, .. } => {
                Some(item_field)
            }
            Self::OwnerSlot { .. } => None,
        }
    }

    /// Collection field on the owner, if the layout has one.
    pub fn collection(self) -> Option<&'static str> {
        match self {
            Self::StubPair { collection, .. } | Self::IndexedPair { collection, .. } => {
                Some(collection)
            }
            Self::OwnerSlot { .. } => None,
        }
    }

    /// Field path that finds items of one owner via a reverse query.
    pub fn item_lookup_path(self) -> Option<String> {
        match self {
            Self::StubPair { item_field, .. } => Some(format!("{item_field}.id")),
            Self::IndexedPair { item_field, .. } => Some(item_field.to_string()),
            Self::OwnerSlot { .. } => None,
        }
    }
}

/// Closed set of maintained relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// One ship carries many cargo.
    ShipCargo,
    /// One slip holds one ship.
    SlipShip,
    /// One dog attends many trainings.
    DogTraining,
    /// One user owns many dogs.
    UserDog,
}

impl Relation {
    pub const ALL: [Relation; 4] = [
        Self::ShipCargo,
        Self::SlipShip,
        Self::DogTraining,
        Self::UserDog,
    ];

    pub fn owner_kind(self) -> ResourceKind {
        match self {
            Self::ShipCargo => ResourceKind::Ship,
            Self::SlipShip => ResourceKind::Slip,
            Self::DogTraining => ResourceKind::Dog,
            Self::UserDog => ResourceKind::User,
        }
    }

    pub fn item_kind(self) -> ResourceKind {
        match self {
            Self::ShipCargo => ResourceKind::Cargo,
            Self::SlipShip => ResourceKind::Ship,
            Self::DogTraining => ResourceKind::Training,
            Self::UserDog => ResourceKind::Dog,
        }
    }

    pub fn cardinality(self) -> Cardinality {
        match self {
            Self::SlipShip => Cardinality::OneToOne,
            Self::ShipCargo | Self::DogTraining | Self::UserDog => Cardinality::OneToMany,
        }
    }

    pub fn layout(self) -> LinkLayout {
        match self {
            Self::ShipCargo => LinkLayout::StubPair {
                item_field: "carrier",
                collection: "cargo",
            },
            Self::SlipShip => LinkLayout::OwnerSlot {
                owner_field: "current_boat",
                companions: &["arrival_date"],
            },
            Self::DogTraining => LinkLayout::StubPair {
                item_field: "dog",
                collection: "training",
            },
            Self::UserDog => LinkLayout::IndexedPair {
                item_field: "owner_id",
                collection: "dogs",
            },
        }
    }

    /// Resolves the relation owning `item_kind` records on behalf of `owner_kind`.
    pub fn between(owner_kind: ResourceKind, item_kind: ResourceKind) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|relation| {
                relation.owner_kind() == owner_kind && relation.item_kind() == item_kind
            })
    }

    /// Fields of `kind` that only the relationship manager may write.
    pub fn link_fields_of(kind: ResourceKind) -> Vec<&'static str> {
        let mut fields = Vec::new();
        for relation in Self::ALL {
            match relation.layout() {
                LinkLayout::StubPair {
                    item_field,
                    collection,
                }
                | LinkLayout::IndexedPair {
                    item_field,
                    collection,
                } => {
                    if relation.owner_kind() == kind {
                        fields.push(collection);
                    }
                    if relation.item_kind() == kind {
                        fields.push(item_field);
                    }
                }
                LinkLayout::OwnerSlot {
                    owner_field,
                    companions,
                } => {
                    if relation.owner_kind() == kind {
                        fields.push(owner_field);
                        fields.extend_from_slice(companions);
                    }
                }
            }
        }
        fields
    }

    /// Collection fields a new `kind` record starts with, as empty arrays.
    pub fn collections_of(kind: ResourceKind) -> Vec<&'static str> {
        Self::ALL
            .into_iter()
            .filter(|relation| relation.owner_kind() == kind)
            .filter_map(|relation| relation.layout().collection())
            .collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ShipCargo => "ship_cargo",
            Self::SlipShip => "slip_ship",
            Self::DogTraining => "dog_training",
            Self::UserDog => "user_dog",
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cardinality, LinkLayout, Relation};
    use crate::model::kind::ResourceKind;

    #[test]
    fn between_resolves_only_declared_pairs() {
        assert_eq!(
            Relation::between(ResourceKind::Ship, ResourceKind::Cargo),
            Some(Relation::ShipCargo)
        );
        assert_eq!(
            Relation::between(ResourceKind::Slip, ResourceKind::Ship),
            Some(Relation::SlipShip)
        );
        assert_eq!(Relation::between(ResourceKind::Cargo, ResourceKind::Ship), None);
        assert_eq!(Relation::between(ResourceKind::User, ResourceKind::Training), None);
    }

    #[test]
    fn only_slip_ship_is_one_to_one() {
        for relation in Relation::ALL {
            let expected = if relation == Relation::SlipShip {
                Cardinality::OneToOne
            } else {
                Cardinality::OneToMany
            };
            assert_eq!(relation.cardinality(), expected, "{relation}");
        }
    }

    #[test]
    fn dog_link_fields_cover_both_roles() {
        let fields = Relation::link_fields_of(ResourceKind::Dog);
        assert!(fields.contains(&"training"));
        assert!(fields.contains(&"owner_id"));
        assert_eq!(
            Relation::link_fields_of(ResourceKind::Slip),
            vec!["current_boat", "arrival_date"]
        );
        assert!(Relation::link_fields_of(ResourceKind::Ship).contains(&"cargo"));
    }

    #[test]
    fn collections_are_owner_side_only() {
        assert_eq!(Relation::collections_of(ResourceKind::Ship), vec!["cargo"]);
        assert_eq!(Relation::collections_of(ResourceKind::User), vec!["dogs"]);
        assert!(Relation::collections_of(ResourceKind::Slip).is_empty());
        assert!(Relation::collections_of(ResourceKind::Cargo).is_empty());
    }

    #[test]
    fn lookup_paths_reach_into_stubs() {
        assert_eq!(
            Relation::ShipCargo.layout().item_lookup_path().as_deref(),
            Some("carrier.id")
        );
        assert_eq!(
            Relation::UserDog.layout().item_lookup_path().as_deref(),
            Some("owner_id")
        );
        assert!(matches!(Relation::SlipShip.layout(), LinkLayout::OwnerSlot { .. }));
        assert_eq!(Relation::SlipShip.layout().item_lookup_path(), None);
    }
}
