//! Prometheus collectors shared by every client in a registry.
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

const LABELS: [&str; 4] = ["status_code", "verb", "kind", "subresource"];

/// The two collectors every API request reports into, keyed by
/// `(status_code, verb, kind, subresource)`.
#[derive(Clone)]
pub struct ClientMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl ClientMetrics {
    /// Create the collectors and register them on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new(
                "kubernetes_client_requests_total",
                "Total requests made to the Kubernetes API server.",
            ),
            &LABELS,
        )?;
        registry.register(Box::new(requests.clone()))?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "kubernetes_client_request_duration_seconds",
                "Full round-trip latency of Kubernetes API requests.",
            ),
            &LABELS,
        )?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { requests, duration })
    }

    /// Collectors backed by a throwaway registry, for contexts where nothing
    /// scrapes them (tests, short-lived tools).
    pub fn unregistered() -> Self {
        Self::register(&Registry::new()).expect("collectors register on a fresh registry")
    }

    /// Record one completed request
    pub fn observe(&self, status_code: u16, verb: &str, kind: &str, subresource: &str, seconds: f64) {
        let code = status_code.to_string();
        let labels = [code.as_str(), verb, kind, subresource];
        self.requests.with_label_values(&labels).inc();
        self.duration.with_label_values(&labels).observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_register_and_observe() {
        let registry = Registry::new();
        let metrics = ClientMetrics::register(&registry).unwrap();
        metrics.observe(200, "get", "Dashboard", "", 0.05);
        metrics.observe(404, "get", "Dashboard", "", 0.01);

        let families = registry.gather();
        let counter = families
            .iter()
            .find(|mf| mf.get_name() == "kubernetes_client_requests_total")
            .unwrap();
        assert_eq!(counter.get_metric().len(), 2);
        assert!(families
            .iter()
            .any(|mf| mf.get_name() == "kubernetes_client_request_duration_seconds"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        ClientMetrics::register(&registry).unwrap();
        assert!(ClientMetrics::register(&registry).is_err());
    }
}
