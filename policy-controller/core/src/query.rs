//! Resolves the policies that apply to a workload and the rules that select it as a peer.
//!
//! A query joins three indexed collections of derived state:
//!
//! ```text
//! [ Pod ] <- [ AppliedToGroup ] <- [ NetworkPolicy ]           (applied policies)
//! [ Pod ] <- [ AddressGroup ] <- [ NetworkPolicy.rules[i] ]    (peer rules)
//! ```
//!
//! Queries never mutate the collections. Each store read observes a consistent snapshot; the
//! querier itself holds no state beyond handles to its collaborators and is safe to share
//! between threads.

use crate::{
    endpoint::{Endpoint, EndpointQueryResponse, Policy, PolicyRef, Rule},
    policy::{AddressGroup, AppliedToGroup, Direction, NetworkPolicy, NetworkPolicyRule},
    store::{DecodeError, DiscoverWorkload, FromRecord, IndexName, IndexedStore, StoreError},
};
use ahash::AHashMap as HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, trace};


#[derive(Clone)]
pub struct EndpointQuerier {
    workloads: Arc<dyn DiscoverWorkload>,
    policies: Arc<dyn IndexedStore>,
    applied_to_groups: Arc<dyn IndexedStore>,
    address_groups: Arc<dyn IndexedStore>,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("pod {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("failed to look up pod {namespace}/{name}: {error}")]
    Workload {
        namespace: String,
        name: String,
        error: anyhow::Error,
    },

    #[error("failed to read policy state: {0}")]
    Store(#[from] StoreError),

    #[error("malformed policy state: {0}")]
    Decode(#[from] DecodeError),
}

type RuleKey = (String, usize, Direction);

// === impl EndpointQuerier ===

impl EndpointQuerier {
    pub fn new(
        workloads: Arc<dyn DiscoverWorkload>,
        policies: Arc<dyn IndexedStore>,
        applied_to_groups: Arc<dyn IndexedStore>,
        address_groups: Arc<dyn IndexedStore>,
    ) -> Self {
        Self {
            workloads,
            policies,
            applied_to_groups,
            address_groups,
        }
    }

    /// Resolves the policies applied to the pod `namespace/name` and the rules that select it as
    /// a peer.
    ///
    /// Both `namespace` and `name` must be non-empty. Policies are sorted by namespace, name, and
    /// UID; rules by policy namespace, policy name, rule index, and direction. Any failure
    /// discards the whole result.
    #[instrument(skip(self))]
    pub fn query_network_policies(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EndpointQueryResponse, QueryError> {
        let pod = match self.workloads.get_workload(namespace, name) {
            Ok(Some(pod)) => pod,
            Ok(None) => {
                debug!("Pod not found");
                return Err(QueryError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            Err(error) => {
                return Err(QueryError::Workload {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    error,
                })
            }
        };

        let key = pod.index_key();
        let policies = self.applied_policies(&key)?;
        let rules = self.peer_rules(&key)?;
        debug!(policies = policies.len(), rules = rules.len(), "Resolved");

        Ok(EndpointQueryResponse::new(vec![Endpoint {
            namespace: pod.namespace,
            name: pod.name,
            policies,
            rules,
        }]))
    }

    /// Finds every policy whose applied-to groups contain the pod, deduplicated by UID.
    fn applied_policies(&self, pod_key: &str) -> Result<Vec<Policy>, QueryError> {
        let groups =
            get_by_index::<AppliedToGroup>(&*self.applied_to_groups, IndexName::Pod, pod_key)?;

        let mut by_uid = HashMap::<String, PolicyRef>::new();
        for group in groups {
            let policies = get_by_index::<NetworkPolicy>(
                &*self.policies,
                IndexName::AppliedToGroup,
                &group.uid,
            )?;
            trace!(group = %group.uid, policies = policies.len(), "Applied-to group selects pod");
            for policy in policies {
                by_uid
                    .entry(policy.uid.clone())
                    .or_insert_with(|| PolicyRef::from(&*policy));
            }
        }

        let mut refs = by_uid.into_values().collect::<Vec<_>>();
        refs.sort();
        Ok(refs
            .into_iter()
            .map(|policy_ref| Policy { policy_ref })
            .collect())
    }

    /// Finds every rule that references an address group containing the pod.
    ///
    /// Matches that reduce to the same policy, rule index, and direction are reported once.
    fn peer_rules(&self, pod_key: &str) -> Result<Vec<Rule>, QueryError> {
        let groups = get_by_index::<AddressGroup>(&*self.address_groups, IndexName::Pod, pod_key)?;

        let mut by_key = HashMap::<RuleKey, Rule>::new();
        for group in groups {
            let policies = get_by_index::<NetworkPolicy>(
                &*self.policies,
                IndexName::AddressGroup,
                &group.uid,
            )?;
            trace!(group = %group.uid, policies = policies.len(), "Address group selects pod");
            for policy in policies {
                for (rule_index, rule) in policy.rules.iter().enumerate() {
                    for direction in peer_directions(rule, &group.uid) {
                        by_key
                            .entry((policy.uid.clone(), rule_index, direction))
                            .or_insert_with(|| Rule {
                                policy_ref: PolicyRef::from(&*policy),
                                direction,
                                rule_index,
                                ports: rule.services.clone(),
                            });
                    }
                }
            }
        }

        let mut rules = by_key.into_values().collect::<Vec<_>>();
        rules.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(rules)
    }
}

/// A pod in a rule's `from` peer is a source of the rule's ingress traffic; a pod in its `to`
/// peer is a destination of its egress traffic. A rule listing the group in both peers matches
/// in both directions.
fn peer_directions(rule: &NetworkPolicyRule, group: &str) -> impl Iterator<Item = Direction> {
    let ingress = rule.from.selects(group).then_some(Direction::In);
    let egress = rule.to.selects(group).then_some(Direction::Out);
    ingress.into_iter().chain(egress)
}

fn get_by_index<T: FromRecord>(
    store: &dyn IndexedStore,
    index: IndexName,
    value: &str,
) -> Result<Vec<Arc<T>>, QueryError> {
    store
        .get_by_index(index, value)?
        .into_iter()
        .map(|record| record.decode::<T>().map_err(Into::into))
        .collect()
}

// === impl QueryError ===

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
