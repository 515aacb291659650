//! Per-entity progress tracking.

use serde::Serialize;
use tracing::{debug, warn};

use ami_core::EntitySlot;

/// Liveness of one entity as seen by its monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing has been written for the entity yet.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Outcome of evaluating one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub slot: EntitySlot,
    pub row: usize,
    pub status: HealthStatus,
    pub write_count: u64,
    /// Consecutive evaluations without progress.
    pub stale_evaluations: u32,
}

/// Tracks write progress for a single entity across evaluations.
#[derive(Debug)]
pub struct EntityTracker {
    status: HealthStatus,
    last_count: u64,
    stale: u32,
    threshold: u32,
}

impl EntityTracker {
    pub fn new(stale_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_count: 0,
            stale: 0,
            threshold: stale_threshold.max(1),
        }
    }

    /// Record the entity's current write count and return the new status.
    pub fn record(&mut self, write_count: u64) -> HealthStatus {
        if write_count == 0 {
            self.stale = 0;
            self.status = HealthStatus::Unknown;
            return self.status;
        }

        if write_count > self.last_count {
            if self.status == HealthStatus::Unhealthy {
                debug!(write_count, "entity recovered to healthy");
            }
            self.last_count = write_count;
            self.stale = 0;
            self.status = HealthStatus::Healthy;
        } else {
            self.stale = self.stale.saturating_add(1);
            if self.stale >= self.threshold {
                if self.status != HealthStatus::Unhealthy {
                    warn!(
                        stale = self.stale,
                        threshold = self.threshold,
                        "entity marked unhealthy"
                    );
                }
                self.status = HealthStatus::Unhealthy;
            }
        }
        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn stale_evaluations(&self) -> u32 {
        self.stale
    }
}
