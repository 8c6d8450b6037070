//! Resource kinds served by the API.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How a kind obtains record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// Store allocates a fresh numeric id on first write.
    Generated,
    /// Caller supplies the id (identity provider subject for users).
    External,
}

/// Closed set of resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ship,
    Cargo,
    Slip,
    Dog,
    Training,
    User,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        Self::Ship,
        Self::Cargo,
        Self::Slip,
        Self::Dog,
        Self::Training,
        Self::User,
    ];

    /// Tag persisted in `entities.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ship => "ship",
            Self::Cargo => "cargo",
            Self::Slip => "slip",
            Self::Dog => "dog",
            Self::Training => "training",
            Self::User => "user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Path segment used when deriving `self` links.
    pub fn route(self) -> &'static str {
        match self {
            Self::Ship => "ships",
            Self::Cargo => "cargo",
            Self::Slip => "slips",
            Self::Dog => "dogs",
            Self::Training => "trainings",
            Self::User => "users",
        }
    }

    pub fn id_policy(self) -> IdPolicy {
        match self {
            Self::User => IdPolicy::External,
            _ => IdPolicy::Generated,
        }
    }

    /// Page size used when neither the caller nor config picks one.
    pub fn default_page_size(self) -> u32 {
        match self {
            Self::Ship | Self::Cargo | Self::Slip => 10,
            Self::Dog | Self::Training | Self::User => 5,
        }
    }

    /// Fields a client may set on create or change through a patch.
    pub fn mutable_fields(self) -> &'static [&'static str] {
        match self {
            Self::Ship => &["name", "type", "length"],
            Self::Cargo => &["weight", "content", "delivery_date"],
            Self::Slip => &["number"],
            Self::Dog => &["name", "breed", "age"],
            Self::Training => &["name", "description", "date"],
            Self::User => &["email", "name"],
        }
    }

    /// Fields a new record must carry.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Ship | Self::Dog => &["name"],
            Self::Slip => &["number"],
            Self::Cargo | Self::Training | Self::User => &[],
        }
    }

    /// Field whose value must be unique across all records of the kind.
    ///
    /// Dog names are unique per owner only, which the resource service
    /// checks separately.
    pub fn unique_field(self) -> Option<&'static str> {
        match self {
            Self::Ship => Some("name"),
            Self::Slip => Some("number"),
            _ => None,
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
