use crate::{
    index::{self, metrics::IndexMetrics, Snapshot, Stores, Workloads},
    EndpointQueryService, QueryMetrics, WorkloadDiscover,
};
use anyhow::{bail, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::{self, Duration};
use tracing::{info, info_span, instrument, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "netpol-controller",
    about = "Answers endpoint queries against derived network policy state"
)]
pub struct Args {
    #[clap(long, default_value = "netpol=info,warn", env = "NETPOL_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the endpoint query server.
    #[clap(long)]
    query_server_disabled: bool,

    /// Path to a JSON snapshot of the derived network policy state.
    ///
    /// When unset, no policies are known and every existing pod resolves to an empty result.
    #[clap(long)]
    derived_state: Option<PathBuf>,

    /// Interval, in seconds, at which the derived state snapshot is re-read. Zero disables
    /// reloading.
    #[clap(long, default_value = "10")]
    derived_state_refresh_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            query_server_disabled,
            derived_state,
            derived_state_refresh_secs,
        } = self;

        let server = if query_server_disabled {
            None
        } else {
            Some(server)
        };

        let stores = Stores::new();
        let workloads = Workloads::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("derived_state"),
            stores.clone(),
        );
        let pod_index =
            IndexMetrics::register(workloads.clone(), prom.sub_registry_with_prefix("pod"))
                .shared();
        let query_metrics = QueryMetrics::register(prom.sub_registry_with_prefix("endpoint_query"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Publish the initial derived state before serving queries. A snapshot that cannot be
        // loaded at startup is fatal.
        let mut current = match derived_state.as_ref() {
            Some(path) => {
                let snapshot = Snapshot::load(path)?;
                stores.reset(snapshot.clone())?;
                Some(snapshot)
            }
            None => {
                warn!("No derived state configured; all queries resolve to empty results");
                None
            }
        };

        if let Some(path) = derived_state {
            if derived_state_refresh_secs > 0 {
                let period = Duration::from_secs(derived_state_refresh_secs);
                let stores = stores.clone();
                tokio::spawn(
                    async move {
                        let mut interval = time::interval(period);
                        // The first tick completes immediately.
                        interval.tick().await;
                        loop {
                            interval.tick().await;
                            current = reload(&path, &stores, current.take());
                        }
                    }
                    .instrument(info_span!("derived_state")),
                );
            }
        }

        // Spawn resource watches.

        let pods = runtime.watch_all::<Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(pod_index, pods).instrument(info_span!("pods")));

        let querier = stores.querier(Arc::new(WorkloadDiscover::new(workloads)));
        let svc = EndpointQueryService::new(querier, query_metrics);
        let runtime = runtime.spawn_server(move || svc.clone());
        info!("Serving endpoint queries");

        // Block until shutdown is signaled and the background tasks have completed.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Re-reads the snapshot at `path` and publishes it if it differs from `current`.
///
/// Failures are logged and the previously published state is retained.
#[instrument(skip_all, fields(path = %path.display()))]
fn reload(path: &Path, stores: &Stores, current: Option<Snapshot>) -> Option<Snapshot> {
    let snapshot = match Snapshot::load(path) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            warn!(%error, "Failed to load derived state");
            return current;
        }
    };
    if current.as_ref() == Some(&snapshot) {
        return current;
    }
    match stores.reset(snapshot.clone()) {
        Ok(()) => Some(snapshot),
        Err(error) => {
            warn!(%error, "Rejected invalid derived state");
            current
        }
    }
}
