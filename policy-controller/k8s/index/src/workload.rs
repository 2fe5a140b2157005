use crate::metrics::SizedIndex;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use netpol_controller_core::policy::PodReference;
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedWorkloads = Arc<RwLock<Workloads>>;

/// Tracks the pods that currently exist, by namespace.
#[derive(Debug, Default)]
pub struct Workloads {
    by_ns: HashMap<String, HashSet<String>>,
}

// === impl Workloads ===

impl Workloads {
    pub fn shared() -> SharedWorkloads {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<PodReference> {
        self.by_ns
            .get(namespace)
            .filter(|pods| pods.contains(name))
            .map(|_| PodReference::new(namespace, name))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_ns.iter().map(|(ns, pods)| (ns.as_str(), pods.len()))
    }
}

impl kubert::index::IndexNamespacedResource<Pod> for Workloads {
    fn apply(&mut self, pod: Pod) {
        let name = pod.name_unchecked();
        let Some(namespace) = pod.namespace() else {
            tracing::warn!(%name, "Pod has no namespace");
            return;
        };
        tracing::trace!(%namespace, %name, "Indexing pod");
        self.by_ns.entry(namespace).or_default().insert(name);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(pods) = self.by_ns.get_mut(&namespace) {
            pods.remove(&name);
            if pods.is_empty() {
                self.by_ns.remove(&namespace);
            }
        }
        tracing::trace!(%namespace, %name, "Removed pod");
    }
}

impl SizedIndex<Pod> for Workloads {
    fn size(&self, namespace: &str) -> usize {
        self.by_ns.get(namespace).map_or(0, |pods| pods.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kubert::index::IndexNamespacedResource;

    fn mk_pod(ns: impl ToString, name: impl ToString) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn tracks_pods_by_namespace() {
        let mut workloads = Workloads::default();
        workloads.apply(mk_pod("ns-0", "pod-0"));
        workloads.apply(mk_pod("ns-0", "pod-1"));
        workloads.apply(mk_pod("ns-1", "pod-0"));

        assert_eq!(
            workloads.get("ns-0", "pod-1"),
            Some(PodReference::new("ns-0", "pod-1"))
        );
        assert_eq!(workloads.get("ns-1", "pod-1"), None);
        assert_eq!(workloads.get("ns-2", "pod-0"), None);
        assert_eq!(workloads.size("ns-0"), 2);

        workloads.delete("ns-0".to_string(), "pod-1".to_string());
        assert_eq!(workloads.get("ns-0", "pod-1"), None);
        assert_eq!(workloads.size("ns-0"), 1);

        workloads.delete("ns-1".to_string(), "pod-0".to_string());
        assert_eq!(workloads.size("ns-1"), 0);
        assert_eq!(workloads.namespaces().count(), 1);
    }

    #[test]
    fn pod_without_namespace_is_ignored() {
        let mut workloads = Workloads::default();
        workloads.apply(Pod {
            metadata: ObjectMeta {
                name: Some("pod-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(workloads.namespaces().count(), 0);
    }
}
