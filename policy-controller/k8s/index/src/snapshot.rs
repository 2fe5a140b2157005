use ahash::AHashSet as HashSet;
use anyhow::Context;
use netpol_controller_core::policy::{AddressGroup, AppliedToGroup, NetworkPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// The complete derived policy state published by the reconciler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub network_policies: Vec<NetworkPolicy>,
    #[serde(default)]
    pub applied_to_groups: Vec<AppliedToGroup>,
    #[serde(default)]
    pub address_groups: Vec<AddressGroup>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("{kind} {uid} is defined more than once")]
    Duplicate { kind: &'static str, uid: String },

    #[error("{kind} has an empty UID")]
    EmptyUid { kind: &'static str },

    #[error("policy {policy} references unknown {kind} {uid}")]
    UnknownGroup {
        policy: String,
        kind: &'static str,
        uid: String,
    },
}

// === impl Snapshot ===

impl Snapshot {
    /// Reads a JSON-encoded snapshot from `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read derived state from {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse derived state from {}", path.display()))
    }

    /// Checks that every record has a unique UID and that every group a policy references is
    /// present.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        unique_uids(
            "NetworkPolicy",
            self.network_policies.iter().map(|p| p.uid.as_str()),
        )?;
        let applied_to_groups = unique_uids(
            "AppliedToGroup",
            self.applied_to_groups.iter().map(|g| g.uid.as_str()),
        )?;
        let address_groups = unique_uids(
            "AddressGroup",
            self.address_groups.iter().map(|g| g.uid.as_str()),
        )?;

        for policy in &self.network_policies {
            for uid in &policy.applied_to_groups {
                if !applied_to_groups.contains(uid.as_str()) {
                    return Err(SnapshotError::UnknownGroup {
                        policy: policy.uid.clone(),
                        kind: "AppliedToGroup",
                        uid: uid.clone(),
                    });
                }
            }
            for uid in policy.address_groups() {
                if !address_groups.contains(uid.as_str()) {
                    return Err(SnapshotError::UnknownGroup {
                        policy: policy.uid.clone(),
                        kind: "AddressGroup",
                        uid,
                    });
                }
            }
        }
        Ok(())
    }
}

fn unique_uids<'a>(
    kind: &'static str,
    uids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, SnapshotError> {
    let mut seen = HashSet::new();
    for uid in uids {
        if uid.is_empty() {
            return Err(SnapshotError::EmptyUid { kind });
        }
        if !seen.insert(uid) {
            return Err(SnapshotError::Duplicate {
                kind,
                uid: uid.to_string(),
            });
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_controller_core::policy::{Direction, NetworkPolicyPeer, NetworkPolicyRule};

    fn policy(uid: &str, applied_to: &[&str], peers: &[&str]) -> NetworkPolicy {
        NetworkPolicy {
            uid: uid.to_string(),
            name: format!("policy-{uid}"),
            namespace: "ns-0".to_string(),
            applied_to_groups: applied_to.iter().map(|s| s.to_string()).collect(),
            rules: vec![NetworkPolicyRule {
                direction: Direction::In,
                from: NetworkPolicyPeer {
                    address_groups: peers.iter().map(|s| s.to_string()).collect(),
                    ..Default::default()
                },
                to: Default::default(),
                services: vec![],
            }],
        }
    }

    fn applied_to_group(uid: &str) -> AppliedToGroup {
        AppliedToGroup {
            uid: uid.to_string(),
            ..Default::default()
        }
    }

    fn address_group(uid: &str) -> AddressGroup {
        AddressGroup {
            uid: uid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_camel_case_json() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{
                "networkPolicies": [{
                    "uid": "p1",
                    "name": "allow-web",
                    "namespace": "ns-0",
                    "appliedToGroups": ["atg-1"],
                    "rules": [{
                        "direction": "In",
                        "from": { "addressGroups": ["ag-1"] },
                        "services": [{ "protocol": "TCP", "port": 80 }]
                    }]
                }],
                "appliedToGroups": [{
                    "uid": "atg-1",
                    "podsByNode": {
                        "node-0": [{ "pod": { "name": "web-0", "namespace": "ns-0" } }]
                    }
                }],
                "addressGroups": [{ "uid": "ag-1" }]
            }"#,
        )
        .expect("snapshot must parse");

        assert_eq!(snapshot.network_policies.len(), 1);
        assert_eq!(
            snapshot.network_policies[0]
                .address_groups()
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["ag-1"]
        );
        assert_eq!(
            snapshot.applied_to_groups[0]
                .pod_keys()
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["web-0/ns-0"]
        );
        assert_eq!(snapshot.validate(), Ok(()));
    }

    #[test]
    fn rejects_duplicate_uids() {
        let snapshot = Snapshot {
            address_groups: vec![address_group("ag-1"), address_group("ag-1")],
            ..Default::default()
        };
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::Duplicate {
                kind: "AddressGroup",
                uid: "ag-1".to_string(),
            })
        );
    }

    #[test]
    fn rejects_dangling_group_references() {
        let snapshot = Snapshot {
            network_policies: vec![policy("p1", &["atg-1"], &["ag-2"])],
            applied_to_groups: vec![applied_to_group("atg-1")],
            address_groups: vec![address_group("ag-1")],
        };
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::UnknownGroup {
                policy: "p1".to_string(),
                kind: "AddressGroup",
                uid: "ag-2".to_string(),
            })
        );

        let snapshot = Snapshot {
            network_policies: vec![policy("p1", &["atg-2"], &[])],
            applied_to_groups: vec![applied_to_group("atg-1")],
            address_groups: vec![],
        };
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::UnknownGroup {
                policy: "p1".to_string(),
                kind: "AppliedToGroup",
                uid: "atg-2".to_string(),
            })
        );
    }

    #[test]
    fn rejects_empty_uids() {
        let snapshot = Snapshot {
            applied_to_groups: vec![applied_to_group("")],
            ..Default::default()
        };
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::EmptyUid {
                kind: "AppliedToGroup"
            })
        );
    }

    #[test]
    fn load_reports_the_path() {
        let err = Snapshot::load("/nonexistent/derived-state.json").expect_err("must fail");
        assert!(
            err.to_string().contains("/nonexistent/derived-state.json"),
            "{err}"
        );
    }
}
