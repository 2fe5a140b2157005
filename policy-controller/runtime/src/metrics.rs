use hyper::http::StatusCode;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// Counts endpoint queries by response status and records how long each took to handle.
#[derive(Clone, Debug)]
pub struct QueryMetrics {
    handled: Family<CodeLabels, Counter>,
    handling: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CodeLabels {
    code: String,
}

// === impl QueryMetrics ===

impl QueryMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of endpoint queries completed, by response status",
            handled.clone(),
        );

        let handling = Histogram::new([0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]);
        reg.register_with_unit(
            "handling",
            "Histogram of endpoint query latency (seconds)",
            Unit::Seconds,
            handling.clone(),
        );

        Self { handled, handling }
    }

    pub(crate) fn observe(&self, status: StatusCode, start: time::Instant) {
        self.handling.observe(start.elapsed().as_secs_f64());
        self.handled
            .get_or_create(&CodeLabels {
                code: status.as_str().to_string(),
            })
            .inc();
    }
}
