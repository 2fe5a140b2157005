//! Endpoint query responses.

use crate::{
    policy::{Direction, NetworkPolicy, NetworkPolicyPort},
    query::QueryError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Refers to a policy by its identity.
///
/// Orders by namespace, then name, then UID.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

/// A policy that applies to the queried endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub policy_ref: PolicyRef,
}

/// A rule that selects the queried endpoint as a traffic peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub policy_ref: PolicyRef,
    pub direction: Direction,
    /// The rule's position in its policy's rule list.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rule_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<NetworkPolicyPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointQueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<Endpoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

// === impl PolicyRef ===

impl From<&NetworkPolicy> for PolicyRef {
    fn from(policy: &NetworkPolicy) -> Self {
        Self {
            namespace: policy.namespace.clone(),
            name: policy.name.clone(),
            uid: policy.uid.clone(),
        }
    }
}

// === impl Rule ===

impl Rule {
    /// Orders rules by policy namespace and name, then rule index, then direction.
    pub(crate) fn sort_key(&self) -> (&str, &str, usize, Direction, &str) {
        (
            &self.policy_ref.namespace,
            &self.policy_ref.name,
            self.rule_index,
            self.direction,
            &self.policy_ref.uid,
        )
    }
}

// === impl EndpointQueryResponse ===

impl EndpointQueryResponse {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: Some(endpoints),
            error: None,
        }
    }

    /// A response describing a failed query. It carries no endpoints.
    pub fn failed(error: &QueryError) -> Self {
        Self {
            endpoints: None,
            error: Some(error.to_string()),
        }
    }
}

impl fmt::Display for EndpointQueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            writeln!(f, "Error: {error}")?;
        }
        for (i, endpoint) in self.endpoints.iter().flatten().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{endpoint}")?;
        }
        Ok(())
    }
}

// === impl Endpoint ===

/// Renders the endpoint as a set of tables: applied policies, then egress rules, then ingress
/// rules.
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Endpoint {}/{}", self.namespace, self.name)?;

        let policies = self
            .policies
            .iter()
            .map(|Policy { policy_ref }| {
                vec![
                    policy_ref.name.clone(),
                    policy_ref.namespace.clone(),
                    policy_ref.uid.clone(),
                ]
            })
            .collect::<Vec<_>>();
        write_section(f, "Applied Policies", &["Name", "Namespace", "UID"], &policies)?;

        let rule_rows = |direction: Direction| {
            self.rules
                .iter()
                .filter(|rule| rule.direction == direction)
                .map(|rule| {
                    vec![
                        rule.policy_ref.name.clone(),
                        rule.policy_ref.namespace.clone(),
                        rule.rule_index.to_string(),
                        rule.policy_ref.uid.clone(),
                    ]
                })
                .collect::<Vec<_>>()
        };
        const RULE_HEADER: [&str; 4] = ["Name", "Namespace", "Index", "UID"];
        write_section(f, "Egress Rules", &RULE_HEADER, &rule_rows(Direction::Out))?;
        write_section(f, "Ingress Rules", &RULE_HEADER, &rule_rows(Direction::In))
    }
}

fn write_section(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    header: &[&str],
    rows: &[Vec<String>],
) -> fmt::Result {
    if rows.is_empty() {
        return writeln!(f, "{label}: None");
    }
    writeln!(f, "{label}:")?;

    let mut widths = header.iter().map(|h| h.len()).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let header = header.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    for row in std::iter::once(&header).chain(rows) {
        let line = row
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("   ");
        writeln!(f, "{}", line.trim_end())?;
    }
    Ok(())
}
