//! Fan-out invoker.
//!
//! Issuing a launch never blocks: each index becomes its own Tokio task,
//! which first awaits the matching upstream row (if any) and then runs the
//! handler on the blocking pool.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ami_core::StageId;

use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::{StageCall, StageRegistry};

type RowHandle<V> = JoinHandle<SchedulerResult<V>>;

/// Per-index pending results of one fan-out.
#[derive(Debug)]
pub struct FutureMap<V> {
    stage: StageId,
    rows: Vec<RowHandle<V>>,
}

impl<V> FutureMap<V> {
    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether every row has finished. Does not wait.
    pub fn is_finished(&self) -> bool {
        self.rows.iter().all(JoinHandle::is_finished)
    }

    /// Wait for every row, in index order.
    pub async fn join(self) -> Vec<SchedulerResult<V>> {
        let stage = self.stage;
        let mut out = Vec::with_capacity(self.rows.len());
        for (index, row) in self.rows.into_iter().enumerate() {
            out.push(flatten(stage, index as u32, row.await));
        }
        out
    }
}

fn flatten<V>(
    stage: StageId,
    index: u32,
    joined: Result<SchedulerResult<V>, tokio::task::JoinError>,
) -> SchedulerResult<V> {
    joined.map_err(|e| SchedulerError::Join {
        stage,
        index,
        message: e.to_string(),
    })?
}

/// Launches registered stages over an index range.
pub struct StageInvoker<V> {
    registry: Arc<StageRegistry<V>>,
}

impl<V> Clone for StageInvoker<V> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<V: Send + 'static> StageInvoker<V> {
    pub fn new(registry: StageRegistry<V>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &StageRegistry<V> {
        &self.registry
    }

    /// Launch `stage` over `0..count`.
    ///
    /// With `upstream`, row `i` receives upstream row `i`'s value and does
    /// not start until that row completes. A failed upstream row resolves
    /// the matching row to [`SchedulerError::Upstream`] without running the
    /// handler. Must be called from within a Tokio runtime.
    pub fn invoke(
        &self,
        stage: StageId,
        count: u32,
        cycle: u64,
        upstream: Option<FutureMap<V>>,
    ) -> SchedulerResult<FutureMap<V>> {
        let handler = self
            .registry
            .get(stage)
            .ok_or(SchedulerError::NotRegistered(stage))?;

        let (upstream_stage, mut upstream_rows): (Option<StageId>, Vec<Option<RowHandle<V>>>) =
            match upstream {
                Some(map) if map.len() != count as usize => {
                    return Err(SchedulerError::RangeMismatch {
                        stage,
                        expected: count,
                        actual: map.len(),
                    });
                }
                Some(map) => (Some(map.stage), map.rows.into_iter().map(Some).collect()),
                None => (None, Vec::new()),
            };
        upstream_rows.resize_with(count as usize, || None);

        let rows = upstream_rows
            .into_iter()
            .enumerate()
            .map(|(index, prior)| {
                let call = StageCall {
                    stage,
                    index: index as u32,
                    cycle,
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let input = match (prior, upstream_stage) {
                        (Some(row), Some(upstream)) => {
                            match flatten(upstream, call.index, row.await) {
                                Ok(value) => Some(value),
                                Err(e) => {
                                    let index = call.index;
                                    debug!(%stage, index, error = %e, "upstream row failed");
                                    return Err(SchedulerError::Upstream {
                                        stage,
                                        index,
                                        upstream,
                                    });
                                }
                            }
                        }
                        _ => None,
                    };

                    let result = tokio::task::spawn_blocking(move || handler.run(&call, input))
                        .await
                        .map_err(|e| SchedulerError::Join {
                            stage,
                            index: call.index,
                            message: e.to_string(),
                        })?;

                    result.map_err(|e| {
                        warn!(%stage, index = call.index, cycle, error = %e, "stage row failed");
                        SchedulerError::Stage {
                            stage,
                            index: call.index,
                            message: format!("{e:#}"),
                        }
                    })
                })
            })
            .collect();

        debug!(%stage, count, cycle, chained = upstream_stage.is_some(), "fan-out issued");
        Ok(FutureMap { stage, rows })
    }
}
