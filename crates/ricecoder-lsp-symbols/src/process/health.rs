//! Health tracking for language servers

use std::time::Duration;

use tracing::{debug, warn};

use crate::types::HealthStatus;

/// Default number of consecutive failures before a server is unhealthy
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Counts consecutive request timeouts of one server
#[derive(Debug, Clone)]
pub struct HealthChecker {
    /// Number of consecutive failures
    failure_count: u32,
    /// Maximum consecutive failures before marking unhealthy
    max_failures: u32,
    /// Latest status
    status: HealthStatus,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(max_failures: u32) -> Self {
        Self {
            failure_count: 0,
            max_failures,
            status: HealthStatus::Healthy {
                latency: Duration::ZERO,
            },
        }
    }

    /// Record a request that was answered in time
    pub fn record_success(&mut self, latency: Duration) -> HealthStatus {
        if self.failure_count > 0 {
            debug!(
                latency_ms = latency.as_millis() as u64,
                previous_failures = self.failure_count,
                "LSP server answering again"
            );
        }
        self.failure_count = 0;
        self.status = HealthStatus::Healthy { latency };
        self.status.clone()
    }

    /// Record a request that missed its deadline
    pub fn record_failure(&mut self, reason: impl Into<String>) -> HealthStatus {
        let reason = reason.into();
        self.failure_count += 1;

        if self.is_unhealthy() {
            warn!(
                failure_count = self.failure_count,
                max_failures = self.max_failures,
                reason = %reason,
                "LSP server is unhealthy"
            );
            self.status = HealthStatus::Unhealthy { reason };
        } else {
            debug!(failure_count = self.failure_count, reason = %reason, "LSP server missed a deadline");
        }
        self.status.clone()
    }

    /// Check if the server should be considered unhealthy
    pub fn is_unhealthy(&self) -> bool {
        self.failure_count >= self.max_failures
    }

    /// Latest status
    pub fn status(&self) -> HealthStatus {
        self.status.clone()
    }

    /// Reset health state, e.g. after a restart
    pub fn reset(&mut self) {
        *self = Self::new(self.max_failures);
    }

    /// Get the number of consecutive failures
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES)
    }
}
