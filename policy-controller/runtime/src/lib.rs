#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netpol_controller_core as core;
pub use netpol_controller_k8s_index as index;

mod args;
mod metrics;
mod service;

pub use self::{args::Args, metrics::QueryMetrics, service::EndpointQueryService};

/// Resolves workloads against the shared pod index.
#[derive(Clone, Debug)]
pub struct WorkloadDiscover(index::SharedWorkloads);

// === impl WorkloadDiscover ===

impl WorkloadDiscover {
    pub fn new(workloads: index::SharedWorkloads) -> Self {
        Self(workloads)
    }
}

impl core::DiscoverWorkload for WorkloadDiscover {
    fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<core::policy::PodReference>> {
        Ok(self.0.read().get(namespace, name))
    }
}
