//! Robustness monitor: evaluation gate and verdict store.
//!
//! The orchestrator asks the monitor for an [`EvaluationGuard`] before
//! launching monitor rows. While a guard is alive the monitor is
//! `Evaluating` and further requests are refused, so evaluations never
//! overlap. Dropping the guard returns the monitor to `Idle`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use ami_core::{EntityKind, EntitySlot, Population};
use ami_table::TableSet;

use crate::tracker::{EntityTracker, HealthStatus, HealthVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Evaluating,
}

/// Held for the duration of one evaluation.
#[derive(Debug)]
pub struct EvaluationGuard {
    evaluating: Arc<AtomicBool>,
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        self.evaluating.store(false, Ordering::Release);
        debug!("robustness monitor idle");
    }
}

pub struct RobustnessMonitor {
    population: Population,
    stale_threshold: u32,
    evaluating: Arc<AtomicBool>,
    /// Trackers by entity row.
    trackers: Mutex<HashMap<usize, EntityTracker>>,
    /// Most recent verdict by entity row.
    verdicts: Mutex<BTreeMap<usize, HealthVerdict>>,
}

impl RobustnessMonitor {
    pub fn new(population: Population, stale_threshold: u32) -> Self {
        Self {
            population,
            stale_threshold,
            evaluating: Arc::new(AtomicBool::new(false)),
            trackers: Mutex::new(HashMap::new()),
            verdicts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.evaluating.load(Ordering::Acquire) {
            MonitorState::Evaluating
        } else {
            MonitorState::Idle
        }
    }

    /// Move to `Evaluating`, or `None` if an evaluation is still running.
    pub fn try_begin(&self) -> Option<EvaluationGuard> {
        self.evaluating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EvaluationGuard {
                evaluating: Arc::clone(&self.evaluating),
            })
    }

    /// Entity rows watched by monitor `index`: workers and graph managers
    /// whose row is congruent to `index` modulo the monitor count.
    pub fn assigned_rows(&self, index: u32) -> Vec<usize> {
        let monitors = self.population.monitors.max(1) as usize;
        let watched = self.population.workers as usize + self.population.graph_managers as usize;
        (0..watched)
            .filter(|row| row % monitors == index as usize)
            .collect()
    }

    /// Evaluate every entity assigned to monitor `index`.
    ///
    /// Workers are judged by their telemetry row, graph managers by their
    /// control row.
    pub fn evaluate(&self, index: u32, tables: &TableSet) -> Vec<HealthVerdict> {
        let rows = self.assigned_rows(index);
        let mut verdicts = Vec::with_capacity(rows.len());
        {
            let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
            for row in rows {
                let Some(slot) = self.population.slot_of(row) else {
                    continue;
                };
                let table = match slot.kind {
                    EntityKind::Worker => &tables.telemetry,
                    _ => &tables.control,
                };
                let write_count = table.write_count(row);
                let tracker = trackers
                    .entry(row)
                    .or_insert_with(|| EntityTracker::new(self.stale_threshold));
                let status = tracker.record(write_count);
                verdicts.push(HealthVerdict {
                    slot,
                    row,
                    status,
                    write_count,
                    stale_evaluations: tracker.stale_evaluations(),
                });
            }
        }

        let unhealthy = verdicts
            .iter()
            .filter(|v| v.status == HealthStatus::Unhealthy)
            .count();
        info!(
            monitor = index,
            entities = verdicts.len(),
            unhealthy,
            "robustness evaluation complete"
        );

        let mut latest = self.verdicts.lock().unwrap_or_else(PoisonError::into_inner);
        for verdict in &verdicts {
            latest.insert(verdict.row, *verdict);
        }
        verdicts
    }

    /// Latest verdict per evaluated entity, in row order.
    pub fn verdicts(&self) -> Vec<HealthVerdict> {
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .copied()
            .collect()
    }

    pub fn verdict(&self, slot: EntitySlot) -> Option<HealthVerdict> {
        let row = self.population.row_of(slot)?;
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&row)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_table::TableManager;

    fn tables(population: &Population) -> TableSet {
        TableManager::new(4).create_all_tables(population).unwrap()
    }

    #[test]
    fn guard_blocks_overlapping_evaluations() {
        let monitor = RobustnessMonitor::new(Population::new(1, 1, 1, 0), 2);
        assert_eq!(monitor.state(), MonitorState::Idle);

        let guard = monitor.try_begin().unwrap();
        assert_eq!(monitor.state(), MonitorState::Evaluating);
        assert!(monitor.try_begin().is_none());

        drop(guard);
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(monitor.try_begin().is_some());
    }

    #[test]
    fn rows_are_shared_round_robin() {
        let monitor = RobustnessMonitor::new(Population::new(3, 2, 2, 8), 2);
        assert_eq!(monitor.assigned_rows(0), vec![0, 2, 4]);
        assert_eq!(monitor.assigned_rows(1), vec![1, 3]);
    }

    #[test]
    fn verdicts_follow_write_progress() {
        let population = Population::new(2, 1, 1, 0);
        let tables = tables(&population);
        let monitor = RobustnessMonitor::new(population, 2);

        // Worker 0 and the graph manager make progress; worker 1 never writes.
        tables.telemetry.append(0, 1, 10).unwrap();
        tables.control.append(2, 1, 1).unwrap();
        let verdicts = monitor.evaluate(0, &tables);
        let status: Vec<_> = verdicts.iter().map(|v| v.status).collect();
        assert_eq!(
            status,
            vec![HealthStatus::Healthy, HealthStatus::Unknown, HealthStatus::Healthy]
        );

        // Only the graph manager keeps going.
        tables.control.append(2, 2, 2).unwrap();
        monitor.evaluate(0, &tables);
        tables.control.append(2, 3, 3).unwrap();
        monitor.evaluate(0, &tables);

        let worker = monitor
            .verdict(EntitySlot::new(EntityKind::Worker, 0))
            .unwrap();
        assert_eq!(worker.status, HealthStatus::Unhealthy);
        assert_eq!(worker.stale_evaluations, 2);
        let manager = monitor
            .verdict(EntitySlot::new(EntityKind::GraphManager, 0))
            .unwrap();
        assert_eq!(manager.status, HealthStatus::Healthy);
        assert_eq!(manager.write_count, 3);
        assert_eq!(monitor.verdicts().len(), 3);
    }
}
