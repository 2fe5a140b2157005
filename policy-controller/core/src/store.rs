//! Read contracts for the indexed collections of derived policy state.

use crate::policy::{AddressGroup, AppliedToGroup, NetworkPolicy, PodReference};
use std::sync::Arc;
use thiserror::Error;

/// Secondary indices maintained over the derived-state collections.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexName {
    /// Indexes `AppliedToGroup`s and `AddressGroup`s by each member's `name/namespace`.
    Pod,

    /// Indexes `NetworkPolicy`s by the UIDs of the `AppliedToGroup`s they apply to.
    AppliedToGroup,

    /// Indexes `NetworkPolicy`s by the UIDs of the `AddressGroup`s their rules reference.
    AddressGroup,
}

/// The kinds of record held in a derived-state collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    NetworkPolicy,
    AppliedToGroup,
    AddressGroup,
}

/// A record as stored in a collection.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    NetworkPolicy(Arc<NetworkPolicy>),
    AppliedToGroup(Arc<AppliedToGroup>),
    AddressGroup(Arc<AddressGroup>),
}

/// Decodes a typed record from a stored one.
pub trait FromRecord: Sized {
    const KIND: Kind;

    fn from_record(record: Record) -> Result<Arc<Self>, DecodeError>;
}

/// A concurrently-readable collection supporting primary-key and secondary-index lookups.
///
/// Each call observes a consistent snapshot of the collection.
pub trait IndexedStore: Send + Sync {
    fn list(&self) -> Result<Vec<Record>, StoreError>;

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError>;

    fn get_by_index(&self, index: IndexName, value: &str) -> Result<Vec<Record>, StoreError>;
}

/// Resolves whether a workload currently exists.
pub trait DiscoverWorkload: Send + Sync {
    /// Returns `None` when the workload does not exist.
    fn get_workload(&self, namespace: &str, name: &str) -> anyhow::Result<Option<PodReference>>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index {0} does not exist")]
    UnknownIndex(IndexName),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("record {key} has kind {found}, expected {expected}")]
pub struct DecodeError {
    pub expected: Kind,
    pub found: Kind,
    pub key: String,
}

// === impl IndexName ===

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "podIndex",
            Self::AppliedToGroup => "appliedToGroupIndex",
            Self::AddressGroup => "addressGroupIndex",
        }
    }
}

impl std::fmt::Display for IndexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Kind ===

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NetworkPolicy => "NetworkPolicy",
            Self::AppliedToGroup => "AppliedToGroup",
            Self::AddressGroup => "AddressGroup",
        })
    }
}

// === impl Record ===

impl Record {
    /// The record's primary key.
    pub fn key(&self) -> &str {
        match self {
            Self::NetworkPolicy(p) => &p.uid,
            Self::AppliedToGroup(g) => &g.uid,
            Self::AddressGroup(g) => &g.uid,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::NetworkPolicy(_) => Kind::NetworkPolicy,
            Self::AppliedToGroup(_) => Kind::AppliedToGroup,
            Self::AddressGroup(_) => Kind::AddressGroup,
        }
    }

    pub fn decode<T: FromRecord>(self) -> Result<Arc<T>, DecodeError> {
        T::from_record(self)
    }

    fn mismatch(&self, expected: Kind) -> DecodeError {
        DecodeError {
            expected,
            found: self.kind(),
            key: self.key().to_string(),
        }
    }
}

impl From<NetworkPolicy> for Record {
    fn from(policy: NetworkPolicy) -> Self {
        Self::NetworkPolicy(Arc::new(policy))
    }
}

impl From<AppliedToGroup> for Record {
    fn from(group: AppliedToGroup) -> Self {
        Self::AppliedToGroup(Arc::new(group))
    }
}

impl From<AddressGroup> for Record {
    fn from(group: AddressGroup) -> Self {
        Self::AddressGroup(Arc::new(group))
    }
}

impl FromRecord for NetworkPolicy {
    const KIND: Kind = Kind::NetworkPolicy;

    fn from_record(record: Record) -> Result<Arc<Self>, DecodeError> {
        match record {
            Record::NetworkPolicy(policy) => Ok(policy),
            record => Err(record.mismatch(Self::KIND)),
        }
    }
}

impl FromRecord for AppliedToGroup {
    const KIND: Kind = Kind::AppliedToGroup;

    fn from_record(record: Record) -> Result<Arc<Self>, DecodeError> {
        match record {
            Record::AppliedToGroup(group) => Ok(group),
            record => Err(record.mismatch(Self::KIND)),
        }
    }
}

impl FromRecord for AddressGroup {
    const KIND: Kind = Kind::AddressGroup;

    fn from_record(record: Record) -> Result<Arc<Self>, DecodeError> {
        match record {
            Record::AddressGroup(group) => Ok(group),
            record => Err(record.mismatch(Self::KIND)),
        }
    }
}
