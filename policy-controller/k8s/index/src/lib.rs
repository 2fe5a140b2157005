//! Network Policy Controller Indices
//!
//! The controller answers endpoint queries against two kinds of state:
//!
//! - Derived policy state: `NetworkPolicy`, `AppliedToGroup`, and `AddressGroup` records computed
//!   by the policy reconciler. Each collection is held in a [`Store`] with the secondary indices
//!   the query engine reads:
//!
//! ```text
//! [ NetworkPolicy ] --appliedToGroupIndex--> [ AppliedToGroup ] --podIndex--> [ Pod ]
//! [ NetworkPolicy ] --addressGroupIndex----> [ AddressGroup ]   --podIndex--> [ Pod ]
//! ```
//!
//! - Workload state: the set of pods that currently exist, indexed from a watch on the cluster's
//!   `Pod` resources. A query for a pod that does not exist fails rather than returning an empty
//!   result.
//!
//! Derived state is published as a whole [`Snapshot`]. Applying a snapshot never exposes a policy
//! whose groups are missing from their stores.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod snapshot;
mod store;
mod workload;

pub use self::{
    snapshot::{Snapshot, SnapshotError},
    store::{Indexer, Store},
    workload::{SharedWorkloads, Workloads},
};
use netpol_controller_core::{DiscoverWorkload, EndpointQuerier, IndexName, Record};
use std::sync::Arc;

/// Handles to each of the derived-state collections.
#[derive(Clone, Debug)]
pub struct Stores {
    pub policies: Arc<Store>,
    pub applied_to_groups: Arc<Store>,
    pub address_groups: Arc<Store>,
}

// === impl Stores ===

impl Stores {
    pub fn new() -> Self {
        Self {
            policies: Arc::new(Store::new(
                "networkpolicies",
                [
                    (IndexName::AppliedToGroup, policy_applied_to_groups as Indexer),
                    (IndexName::AddressGroup, policy_address_groups as Indexer),
                ],
            )),
            applied_to_groups: Arc::new(Store::new(
                "appliedtogroups",
                [(IndexName::Pod, group_pods as Indexer)],
            )),
            address_groups: Arc::new(Store::new(
                "addressgroups",
                [(IndexName::Pod, group_pods as Indexer)],
            )),
        }
    }

    /// Builds a querier over these stores.
    pub fn querier(&self, workloads: Arc<dyn DiscoverWorkload>) -> EndpointQuerier {
        EndpointQuerier::new(
            workloads,
            self.policies.clone(),
            self.applied_to_groups.clone(),
            self.address_groups.clone(),
        )
    }

    /// Replaces the contents of all stores with `snapshot`.
    ///
    /// The snapshot is validated before anything is written; an invalid snapshot leaves the stores
    /// unchanged. Groups are published before the policies that reference them and removed only
    /// after those policies are gone.
    pub fn reset(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        snapshot.validate()?;
        let Snapshot {
            network_policies,
            applied_to_groups,
            address_groups,
        } = snapshot;

        let applied_to_groups = applied_to_groups
            .into_iter()
            .map(Record::from)
            .collect::<Vec<_>>();
        let address_groups = address_groups
            .into_iter()
            .map(Record::from)
            .collect::<Vec<_>>();

        for group in &applied_to_groups {
            self.applied_to_groups.apply(group.clone());
        }
        for group in &address_groups {
            self.address_groups.apply(group.clone());
        }

        self.policies.reset(network_policies.into_iter().map(Record::from));

        self.applied_to_groups.reset(applied_to_groups);
        self.address_groups.reset(address_groups);

        tracing::info!(
            policies = self.policies.len(),
            applied_to_groups = self.applied_to_groups.len(),
            address_groups = self.address_groups.len(),
            "Applied derived state"
        );
        Ok(())
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

fn group_pods(record: &Record) -> Vec<String> {
    let keys = match record {
        Record::AppliedToGroup(group) => group.pod_keys(),
        Record::AddressGroup(group) => group.pod_keys(),
        Record::NetworkPolicy(_) => return vec![],
    };
    keys.into_iter().collect()
}

fn policy_applied_to_groups(record: &Record) -> Vec<String> {
    match record {
        Record::NetworkPolicy(policy) => policy.applied_to_groups.clone(),
        _ => vec![],
    }
}

fn policy_address_groups(record: &Record) -> Vec<String> {
    match record {
        Record::NetworkPolicy(policy) => policy.address_groups().into_iter().collect(),
        _ => vec![],
    }
}
