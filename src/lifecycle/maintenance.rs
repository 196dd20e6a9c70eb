//! Periodic housekeeping.
//!
//! # Responsibilities
//! - Prune expired value-cache and response-cache entries
//! - Purge idle per-operation metric records
//! - Purge expired or exhausted CSRF tokens
//!
//! Lazy expiry on read always applies regardless of this sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::resilience::cache::ResponseCache;
use crate::resilience::ResilienceService;
use crate::security::CsrfService;

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub value_cache: usize,
    pub response_cache: usize,
    pub metrics: usize,
    pub csrf_tokens: usize,
}

pub struct MaintenanceTask {
    resilience: Arc<ResilienceService>,
    response_cache: Arc<ResponseCache>,
    csrf: Arc<CsrfService>,
    interval: Duration,
}

impl MaintenanceTask {
    pub fn new(
        resilience: Arc<ResilienceService>,
        response_cache: Arc<ResponseCache>,
        csrf: Arc<CsrfService>,
        interval: Duration,
    ) -> Self {
        Self {
            resilience,
            response_cache,
            csrf,
            interval,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let (value_cache, metrics) = self.resilience.run_maintenance();
        let report = SweepReport {
            value_cache,
            response_cache: self.response_cache.prune(),
            metrics,
            csrf_tokens: self.csrf.cleanup(),
        };
        tracing::debug!(
            value_cache = report.value_cache,
            response_cache = report.response_cache,
            metrics = report.metrics,
            csrf_tokens = report.csrf_tokens,
            "Maintenance sweep complete"
        );
        report
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Maintenance task starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
