//! Scheduler
//!
//! Drives the reconciler forever on a fixed interval. Every tick is a full,
//! independent pass; nothing but the catalog survives from one tick to the
//! next. Cancelling the token stops the loop at the next await point.

use super::reconciler::Reconciler;
use super::report::TickReport;
use crate::error::{Error, Result};
use crate::metrics::ProvisionerMetrics;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between the end of one tick and the start of the next
    pub interval: Duration,
    /// Upper bound for a whole tick
    pub tick_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            tick_deadline: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Runs reconciliation ticks until cancelled
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: Arc<Reconciler>,
    metrics: Option<Arc<ProvisionerMetrics>>,
    /// Set once the first tick has produced a report
    ready: Arc<AtomicBool>,
    ticks: AtomicU64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, reconciler: Arc<Reconciler>) -> Self {
        Self {
            config,
            reconciler,
            metrics: None,
            ready: Arc::new(AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ProvisionerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Flag that flips to true after the first completed tick
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Number of ticks started so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run a single tick within the tick deadline
    pub async fn run_once(&self) -> Result<TickReport> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let result = match tokio::time::timeout(self.config.tick_deadline, self.reconciler.reconcile())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("tick {}", tick),
                self.config.tick_deadline,
            )),
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(report) => {
                self.ready.store(true, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_tick(report, elapsed);
                }
                log_report(tick, report, elapsed);
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_tick_error(elapsed);
                }
                error!(tick, error = %e, "Tick aborted, retrying next interval");
            }
        }

        result
    }

    /// Tick until `cancel` fires. Returns the number of ticks run.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            instances = self.reconciler.catalog().len(),
            "Starting reconciliation loop"
        );

        let mut completed = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.run_once() => completed += 1,
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(ticks = completed, "Reconciliation loop stopped");
        completed
    }
}

fn log_report(tick: u64, report: &TickReport, elapsed: Duration) {
    for failure in &report.failed_profiles {
        warn!(tick, profile = %failure.scope, reason = %failure.reason, "Profile skipped");
    }
    for failure in &report.failed_instances {
        warn!(tick, instance = %failure.scope, reason = %failure.reason, "Instance credentials unavailable");
    }

    info!(
        tick,
        pairs = report.pairs.len(),
        created = report.created(),
        failures = report.failures(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "Tick complete"
    );
}
