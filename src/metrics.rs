//! Provisioner Metrics
//!
//! Prometheus metrics derived from tick reports, kept in a dedicated
//! registry and served from `/metrics`.

use crate::error::{Error, Result};
use crate::provisioning::report::{ObjectKind, PairState, TickReport};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics for the reconciliation loop
pub struct ProvisionerMetrics {
    registry: Registry,
    ticks: IntCounterVec,
    tick_duration: Histogram,
    actions: IntCounterVec,
    last_tick_failures: IntGauge,
    converged_pairs: IntGauge,
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl ProvisionerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ticks = IntCounterVec::new(
            Opts::new("blob_provisioner_ticks_total", "Reconciliation ticks by result"),
            &["result"],
        )
        .map_err(metrics_error)?;
        let tick_duration = Histogram::with_opts(HistogramOpts::new(
            "blob_provisioner_tick_duration_seconds",
            "Duration of reconciliation ticks",
        ))
        .map_err(metrics_error)?;
        let actions = IntCounterVec::new(
            Opts::new(
                "blob_provisioner_actions_total",
                "Create-if-absent steps by object kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .map_err(metrics_error)?;
        let last_tick_failures = IntGauge::new(
            "blob_provisioner_last_tick_failures",
            "Failures recorded in the most recent tick",
        )
        .map_err(metrics_error)?;
        let converged_pairs = IntGauge::new(
            "blob_provisioner_converged_pairs",
            "Profile/instance pairs with container, volume and claim in place",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(ticks.clone())).map_err(metrics_error)?;
        registry.register(Box::new(tick_duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(actions.clone())).map_err(metrics_error)?;
        registry.register(Box::new(last_tick_failures.clone())).map_err(metrics_error)?;
        registry.register(Box::new(converged_pairs.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            ticks,
            tick_duration,
            actions,
            last_tick_failures,
            converged_pairs,
        })
    }

    /// Record a tick that produced a report
    pub fn record_tick(&self, report: &TickReport, elapsed: Duration) {
        self.ticks.with_label_values(&["ok"]).inc();
        self.tick_duration.observe(elapsed.as_secs_f64());

        for pair in &report.pairs {
            for kind in [ObjectKind::Container, ObjectKind::Volume, ObjectKind::Claim] {
                self.actions
                    .with_label_values(&[kind.as_str(), pair.outcome(kind).label()])
                    .inc();
            }
        }

        let converged = report
            .pairs
            .iter()
            .filter(|p| p.state() == PairState::ClaimCreated)
            .count();
        self.converged_pairs.set(converged as i64);
        self.last_tick_failures.set(report.failures() as i64);
    }

    /// Record a tick that was aborted
    pub fn record_tick_error(&self, elapsed: Duration) {
        self.ticks.with_label_values(&["error"]).inc();
        self.tick_duration.observe(elapsed.as_secs_f64());
        self.last_tick_failures.set(1);
    }

    /// Text exposition of all metrics, with its content type
    pub fn encode(&self) -> Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::report::{ActionOutcome, PairReport};

    #[test]
    fn test_record_tick() {
        let metrics = ProvisionerMetrics::new().unwrap();
        let report = TickReport {
            pairs: vec![
                PairReport {
                    profile: "alice".into(),
                    instance: "standard".into(),
                    container: ActionOutcome::Created,
                    volume: ActionOutcome::Created,
                    claim: ActionOutcome::Created,
                },
                PairReport {
                    profile: "alice".into(),
                    instance: "standard-ro".into(),
                    container: ActionOutcome::NotApplicable,
                    volume: ActionOutcome::Failed("denied".into()),
                    claim: ActionOutcome::Present,
                },
            ],
            ..Default::default()
        };

        metrics.record_tick(&report, Duration::from_millis(120));

        assert_eq!(metrics.ticks.with_label_values(&["ok"]).get(), 1);
        assert_eq!(metrics.actions.with_label_values(&["volume", "created"]).get(), 1);
        assert_eq!(metrics.actions.with_label_values(&["volume", "failed"]).get(), 1);
        assert_eq!(metrics.actions.with_label_values(&["container", "not_applicable"]).get(), 1);
        assert_eq!(metrics.converged_pairs.get(), 1);
        assert_eq!(metrics.last_tick_failures.get(), 1);

        let (body, content_type) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("blob_provisioner_ticks_total{result=\"ok\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ProvisionerMetrics::new().unwrap();
        let b = ProvisionerMetrics::new().unwrap();
        a.record_tick_error(Duration::from_secs(1));

        assert_eq!(a.ticks.with_label_values(&["error"]).get(), 1);
        assert_eq!(b.ticks.with_label_values(&["error"]).get(), 0);
    }
}
