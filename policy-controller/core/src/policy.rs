//! Derived network-policy state.
//!
//! These records are computed by the reconciliation loop from the cluster's raw policy, pod, and
//! namespace objects. They are immutable once published: an update replaces the whole record in
//! its store.

use crate::IpBlock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifies a pod that is a member of a group.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub pod: PodReference,
}

/// Members of a group, partitioned by the node each pod is scheduled on.
pub type PodsByNode = BTreeMap<String, Vec<GroupMember>>;

/// The set of pods to which a policy's rules apply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedToGroup {
    pub uid: String,
    #[serde(default)]
    pub pods_by_node: PodsByNode,
}

/// The set of pods selected by a rule's peer (`from` or `to`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressGroup {
    pub uid: String,
    #[serde(default)]
    pub pods_by_node: PodsByNode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Rules in declaration order. A rule's position is its index.
    #[serde(default)]
    pub rules: Vec<NetworkPolicyRule>,
    /// UIDs of the `AppliedToGroup`s this policy applies to.
    #[serde(default)]
    pub applied_to_groups: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyRule {
    pub direction: Direction,
    #[serde(default)]
    pub from: NetworkPolicyPeer,
    #[serde(default)]
    pub to: NetworkPolicyPeer,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<NetworkPolicyPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyPeer {
    /// UIDs of the `AddressGroup`s selected by this peer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_blocks: Vec<IpBlock>,
}

/// The direction of traffic a rule governs, relative to the pods the policy applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Inbound traffic.
    In,
    /// Outbound traffic.
    Out,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    TCP,
    UDP,
    SCTP,
}

/// A port referenced by number or by a container port's name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(u16),
    Name(String),
}

// === impl PodReference ===

impl PodReference {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// The value under which groups containing this pod are indexed.
    pub fn index_key(&self) -> String {
        format!("{}/{}", self.name, self.namespace)
    }
}

impl std::fmt::Display for PodReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl AppliedToGroup ===

impl AppliedToGroup {
    pub fn pod_keys(&self) -> BTreeSet<String> {
        pod_keys(&self.pods_by_node)
    }

    pub fn contains(&self, pod: &PodReference) -> bool {
        contains(&self.pods_by_node, pod)
    }
}

// === impl AddressGroup ===

impl AddressGroup {
    pub fn pod_keys(&self) -> BTreeSet<String> {
        pod_keys(&self.pods_by_node)
    }

    pub fn contains(&self, pod: &PodReference) -> bool {
        contains(&self.pods_by_node, pod)
    }
}

fn pod_keys(pods_by_node: &PodsByNode) -> BTreeSet<String> {
    pods_by_node
        .values()
        .flatten()
        .map(|member| member.pod.index_key())
        .collect()
}

fn contains(pods_by_node: &PodsByNode, pod: &PodReference) -> bool {
    pods_by_node
        .values()
        .flatten()
        .any(|member| member.pod == *pod)
}

// === impl NetworkPolicy ===

impl NetworkPolicy {
    /// Returns the UIDs of all address groups referenced by any of this policy's rules.
    pub fn address_groups(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .flat_map(|rule| {
                rule.from
                    .address_groups
                    .iter()
                    .chain(rule.to.address_groups.iter())
            })
            .cloned()
            .collect()
    }
}

// === impl NetworkPolicyPeer ===

impl NetworkPolicyPeer {
    pub fn selects(&self, address_group: &str) -> bool {
        self.address_groups.iter().any(|uid| uid == address_group)
    }
}

// === impl Direction ===

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "In",
            Self::Out => "Out",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn member(ns: &str, name: &str) -> GroupMember {
        GroupMember {
            pod: PodReference::new(ns, name),
        }
    }

    #[test]
    fn pod_keys_span_all_nodes() {
        let group = AddressGroup {
            uid: "g1".to_string(),
            pods_by_node: btreemap! {
                "node-a".to_string() => vec![member("ns-0", "pod-0"), member("ns-1", "pod-0")],
                "node-b".to_string() => vec![member("ns-0", "pod-1")],
            },
        };

        assert_eq!(
            group.pod_keys().into_iter().collect::<Vec<_>>(),
            vec!["pod-0/ns-0", "pod-0/ns-1", "pod-1/ns-0"],
        );
        assert!(group.contains(&PodReference::new("ns-0", "pod-1")));
        assert!(!group.contains(&PodReference::new("ns-1", "pod-1")));
    }

    #[test]
    fn policy_address_groups_include_both_peers() {
        let policy = NetworkPolicy {
            uid: "p1".to_string(),
            name: "allow-web".to_string(),
            rules: vec![
                NetworkPolicyRule {
                    direction: Direction::In,
                    from: NetworkPolicyPeer {
                        address_groups: vec!["g1".to_string()],
                        ..Default::default()
                    },
                    to: Default::default(),
                    services: vec![],
                },
                NetworkPolicyRule {
                    direction: Direction::Out,
                    from: Default::default(),
                    to: NetworkPolicyPeer {
                        address_groups: vec!["g2".to_string(), "g1".to_string()],
                        ..Default::default()
                    },
                    services: vec![],
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            policy.address_groups().into_iter().collect::<Vec<_>>(),
            vec!["g1", "g2"]
        );
    }

    #[test]
    fn ports_deserialize_by_number_or_name() {
        let ports: Vec<NetworkPolicyPort> = serde_json::from_str(
            r#"[{"protocol":"TCP","port":8080},{"protocol":"UDP","port":"dns"},{}]"#,
        )
        .expect("ports must parse");
        assert_eq!(
            ports,
            vec![
                NetworkPolicyPort {
                    protocol: Some(Protocol::TCP),
                    port: Some(Port::Number(8080)),
                },
                NetworkPolicyPort {
                    protocol: Some(Protocol::UDP),
                    port: Some(Port::Name("dns".to_string())),
                },
                NetworkPolicyPort {
                    protocol: None,
                    port: None,
                },
            ]
        );
    }
}
