//! Observability infrastructure for the bootstrap run
//!
//! Provides:
//! - Prometheus metrics (per-step latency and failures, node count)
//! - Structured JSON logging with tracing

use crate::error::{BootstrapError, Step};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for provisioning calls (in seconds)
const STEP_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BootstrapMetricsInner> = OnceLock::new();

struct BootstrapMetricsInner {
    step_latency_seconds: HistogramVec,
    step_failures: IntCounterVec,
    containers_provisioned: IntCounterVec,
    nodes_discovered: IntGauge,
}

impl BootstrapMetricsInner {
    fn new() -> Self {
        Self {
            step_latency_seconds: register_histogram_vec!(
                "swarm_bootstrap_step_latency_seconds",
                "Time spent in one provisioning step for one node",
                &["step"],
                STEP_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register step_latency_seconds"),

            step_failures: register_int_counter_vec!(
                "swarm_bootstrap_step_failures_total",
                "Provisioning steps that failed",
                &["step"]
            )
            .expect("Failed to register step_failures"),

            containers_provisioned: register_int_counter_vec!(
                "swarm_bootstrap_containers_provisioned_total",
                "Containers created and started",
                &["step"]
            )
            .expect("Failed to register containers_provisioned"),

            nodes_discovered: register_int_gauge!(
                "swarm_bootstrap_nodes_discovered",
                "Nodes reported by the temporary Swarm manager"
            )
            .expect("Failed to register nodes_discovered"),
        }
    }
}

/// Bootstrap metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct BootstrapMetrics {
    _private: (),
}

impl Default for BootstrapMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BootstrapMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BootstrapMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_step_latency(&self, step: Step, duration_secs: f64) {
        self.inner()
            .step_latency_seconds
            .with_label_values(&[step.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_step_failures(&self, step: Step) {
        self.inner()
            .step_failures
            .with_label_values(&[step.as_str()])
            .inc();
    }

    pub fn inc_containers_provisioned(&self, step: Step) {
        self.inner()
            .containers_provisioned
            .with_label_values(&[step.as_str()])
            .inc();
    }

    pub fn set_nodes_discovered(&self, count: usize) {
        self.inner().nodes_discovered.set(count as i64);
    }

    pub fn step_failures(&self, step: Step) -> u64 {
        self.inner()
            .step_failures
            .with_label_values(&[step.as_str()])
            .get()
    }

    /// Render the default registry in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for run-level bootstrap events
#[derive(Clone)]
pub struct StructuredLogger {
    manager: String,
}

impl StructuredLogger {
    /// `manager` is the temporary manager the run starts from
    pub fn new(manager: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
        }
    }

    pub fn log_started(&self, version: &str, servers: usize) {
        info!(
            event = "bootstrap_started",
            manager = %self.manager,
            version = %version,
            consul_servers = servers,
            "Swarm bootstrap started"
        );
    }

    pub fn log_step_completed(&self, node: &str, step: Step, container_id: &str) {
        info!(
            event = "step_completed",
            manager = %self.manager,
            node = %node,
            step = %step,
            container_id = %container_id,
            "Provisioning step completed"
        );
    }

    pub fn log_node_failed(&self, node: &str, error: &BootstrapError) {
        warn!(
            event = "node_failed",
            manager = %self.manager,
            node = %node,
            step = ?error.step(),
            error = %error,
            "Node bootstrap stopped after a failed step"
        );
    }

    pub fn log_manager_promoted(&self, container_id: &str, discovery: &str) {
        info!(
            event = "manager_promoted",
            manager = %self.manager,
            container_id = %container_id,
            discovery = %discovery,
            "Permanent Swarm manager started"
        );
    }

    pub fn log_finished(&self, complete: usize, failed: usize, elapsed_secs: f64) {
        if failed == 0 {
            info!(
                event = "bootstrap_finished",
                manager = %self.manager,
                nodes_complete = complete,
                nodes_failed = failed,
                elapsed_secs = elapsed_secs,
                "Swarm bootstrap finished"
            );
        } else {
            warn!(
                event = "bootstrap_finished",
                manager = %self.manager,
                nodes_complete = complete,
                nodes_failed = failed,
                elapsed_secs = elapsed_secs,
                "Swarm bootstrap finished with failed nodes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_metrics_render() {
        let metrics = BootstrapMetrics::new();

        metrics.observe_step_latency(Step::DistributeConfig, 0.02);
        metrics.inc_containers_provisioned(Step::DistributeConfig);
        metrics.set_nodes_discovered(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("swarm_bootstrap_step_latency_seconds"));
        assert!(text.contains("swarm_bootstrap_nodes_discovered"));
    }

    #[test]
    fn test_step_failures_counter() {
        let metrics = BootstrapMetrics::new();
        let before = metrics.step_failures(Step::PromoteManager);
        metrics.inc_step_failures(Step::PromoteManager);
        assert!(metrics.step_failures(Step::PromoteManager) > before);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("swarm-manager-tmp");
        assert_eq!(logger.manager, "swarm-manager-tmp");
    }
}
