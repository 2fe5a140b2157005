use crate::Stores;
use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{
        counter::Counter,
        family::Family,
        gauge::{ConstGauge, Gauge},
        MetricType,
    },
    registry::Registry,
};
use std::sync::Arc;

/// Instruments a watched resource index with apply, delete, and reset counts.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

/// Reports the number of records in each derived-state store.
#[derive(Debug)]
struct StoreSizes(Stores);

/// Registers gauges reporting the size of each derived-state store.
pub fn register(reg: &mut Registry, stores: Stores) {
    reg.register_collector(Box::new(StoreSizes(stores)));
}

// === impl SizedIndex ===

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn record_size<R>(&self, namespace: String, kind: &str)
    where
        T: SizedIndex<R>,
    {
        let size = self.inner.size(&namespace);
        self.index_size
            .get_or_create(&NamespacedIndexLabels {
                namespace,
                kind: kind.to_string(),
            })
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        let namespace = resource.namespace().unwrap_or_default();
        self.index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
        self.record_size::<R>(namespace, &kind);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = R::kind(&());
        self.index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.record_size::<R>(namespace, &kind);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let kind = R::kind(&());
        let namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.iter().map(|(namespace, _)| namespace.clone()))
            .collect::<Vec<_>>();
        self.index_resets
            .get_or_create(&IndexLabels {
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.record_size::<R>(ns, &kind);
        }
    }
}

// === impl StoreSizes ===

impl Collector for StoreSizes {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let Stores {
            policies,
            applied_to_groups,
            address_groups,
        } = &self.0;

        for (name, help, store) in [
            (
                "network_policy_index_size",
                "The number of network policies in index",
                policies,
            ),
            (
                "applied_to_group_index_size",
                "The number of applied-to groups in index",
                applied_to_groups,
            ),
            (
                "address_group_index_size",
                "The number of address groups in index",
                address_groups,
            ),
        ] {
            let size = ConstGauge::new(store.len() as i64);
            let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            size.encode(metric_encoder)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Snapshot, Workloads};
    use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use kubert::index::IndexNamespacedResource;
    use netpol_controller_core::policy::{AppliedToGroup, NetworkPolicy};

    fn encode(reg: &Registry) -> String {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, reg).expect("must encode");
        out
    }

    #[test]
    fn reports_store_sizes() {
        let stores = Stores::new();
        stores
            .reset(Snapshot {
                network_policies: vec![NetworkPolicy {
                    uid: "p1".to_string(),
                    name: "deny-all".to_string(),
                    applied_to_groups: vec!["atg-1".to_string()],
                    ..Default::default()
                }],
                applied_to_groups: vec![AppliedToGroup {
                    uid: "atg-1".to_string(),
                    ..Default::default()
                }],
                address_groups: vec![],
            })
            .expect("snapshot must be valid");

        let mut reg = Registry::default();
        register(&mut reg, stores);
        let text = encode(&reg);
        assert!(text.contains("network_policy_index_size 1\n"), "{text}");
        assert!(text.contains("applied_to_group_index_size 1\n"), "{text}");
        assert!(text.contains("address_group_index_size 0\n"), "{text}");
    }

    #[test]
    fn counts_pod_updates() {
        let mut reg = Registry::default();
        let workloads = Workloads::shared();
        let mut index = IndexMetrics::register(workloads.clone(), &mut reg);

        index.apply(Pod {
            metadata: ObjectMeta {
                namespace: Some("ns-0".to_string()),
                name: Some("pod-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(workloads.read().get("ns-0", "pod-0").is_some());

        let text = encode(&reg);
        assert!(
            text.contains(r#"index_applies_total{namespace="ns-0",kind="Pod"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"index_size{namespace="ns-0",kind="Pod"} 1"#),
            "{text}"
        );

        IndexNamespacedResource::<Pod>::delete(
            &mut index,
            "ns-0".to_string(),
            "pod-0".to_string(),
        );
        let text = encode(&reg);
        assert!(
            text.contains(r#"index_size{namespace="ns-0",kind="Pod"} 0"#),
            "{text}"
        );
    }
}
