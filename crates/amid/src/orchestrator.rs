//! Pipeline orchestrator: the main cycle loop.
//!
//! One cycle:
//!
//! ```text
//! data source ─▶ worker ─▶ collector      (per worker row, chained)
//! graph manager                           (independent, concurrent)
//! robustness monitor                      (cadence-gated, background)
//! ── await chain + graph managers ──
//! persist telemetry, result, control      (cadence-gated)
//! ```
//!
//! The monitor launch is never awaited by the cycle that issued it. If it
//! is still evaluating when the next cycle's cadence fires, that launch is
//! skipped.

use std::time::Duration;

use anyhow::bail;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ami_core::{CadenceGate, SourceFailurePolicy, StageId};
use ami_scheduler::SchedulerResult;
use ami_source::SourceState;
use ami_table::PersistReport;

use crate::context::PipelineContext;
use crate::stages::StageValue;

/// Summary of one orchestration cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Worker rows whose chain completed.
    pub telemetry_rows: usize,
    /// Worker rows whose chain failed at any stage.
    pub failed_rows: usize,
    pub graph_manager_rows: usize,
    pub monitor_started: bool,
    pub persisted: Vec<PersistReport>,
    pub persist_failures: usize,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    cycle: u64,
    persist_gate: CadenceGate,
    monitor_gate: CadenceGate,
    monitor_task: Option<JoinHandle<()>>,
    pacing: Duration,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let persist_gate = CadenceGate::from_policy(ctx.config.persist.cadence.clone());
        let monitor_gate = CadenceGate::from_policy(ctx.config.monitor.cadence.clone());
        Self {
            ctx,
            cycle: 0,
            persist_gate,
            monitor_gate,
            monitor_task: None,
            pacing: Duration::ZERO,
        }
    }

    /// Replace the persist cadence with a custom gate.
    pub fn with_persist_gate(mut self, gate: CadenceGate) -> Self {
        self.persist_gate = gate;
        self
    }

    /// Replace the monitor cadence with a custom gate.
    pub fn with_monitor_gate(mut self, gate: CadenceGate) -> Self {
        self.monitor_gate = gate;
        self
    }

    /// Minimum pause between cycles in [`Orchestrator::run`].
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Number of cycles completed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Apply the source failure policy at a cycle boundary.
    fn reconcile_source(&self) -> anyhow::Result<()> {
        if self.ctx.source_state() != SourceState::Failed {
            return Ok(());
        }
        match self.ctx.config.source.on_unavailable {
            SourceFailurePolicy::Retry => {
                self.ctx.reset_source();
                info!(cycle = self.cycle, "data source closed for retry");
                Ok(())
            }
            SourceFailurePolicy::Abort => {
                bail!("data source unavailable; aborting at cycle {}", self.cycle)
            }
        }
    }

    fn start_monitor(&mut self, cycle: u64) -> SchedulerResult<bool> {
        let monitors = self.ctx.population.monitors;
        if monitors == 0 || !self.monitor_gate.is_due(cycle) {
            return Ok(false);
        }
        let Some(guard) = self.ctx.monitor.try_begin() else {
            debug!(cycle, "robustness monitor still evaluating, launch skipped");
            return Ok(false);
        };

        let launch = self
            .ctx
            .invoker
            .invoke(StageId::RobustnessMonitor, monitors, cycle, None)?;
        self.monitor_task = Some(tokio::spawn(async move {
            for result in launch.join().await {
                if let Err(e) = result {
                    warn!(error = %e, "robustness monitor row failed");
                }
            }
            drop(guard);
        }));
        Ok(true)
    }

    /// Run one full cycle and return its report.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        self.reconcile_source()?;
        let cycle = self.cycle;
        let population = self.ctx.population;
        let invoker = self.ctx.invoker.clone();
        let source_kind = self.ctx.source_kind();

        let workers = population.workers;
        let produced = invoker.invoke(StageId::DataSource(source_kind), workers, cycle, None)?;
        let reduced = invoker.invoke(StageId::Worker, workers, cycle, Some(produced))?;
        let collected = invoker.invoke(StageId::Collector, workers, cycle, Some(reduced))?;
        let managed =
            invoker.invoke(StageId::GraphManager, population.graph_managers, cycle, None)?;

        let monitor_started = self.start_monitor(cycle)?;

        let chain = collected.join().await;
        let failed_rows = chain.iter().filter(|r| r.is_err()).count();
        for e in chain.iter().filter_map(|r| r.as_ref().err()) {
            debug!(cycle, error = %e, "telemetry row did not complete");
        }
        let graph_manager_rows = managed
            .join()
            .await
            .into_iter()
            .filter(|r: &SchedulerResult<StageValue>| match r {
                Ok(_) => true,
                Err(e) => {
                    warn!(cycle, error = %e, "graph manager row failed");
                    false
                }
            })
            .count();

        let mut persisted = Vec::new();
        let mut persist_failures = 0;
        if self.persist_gate.is_due(cycle) {
            let snapshots = self.ctx.snapshots.clone();
            let tables = self.ctx.tables.clone();
            let results =
                tokio::task::spawn_blocking(move || snapshots.persist_all(&tables)).await?;
            for result in results {
                match result {
                    Ok(report) => persisted.push(report),
                    Err(_) => persist_failures += 1,
                }
            }
        }

        if self.ctx.source_state() == SourceState::Failed
            && self.ctx.config.source.on_unavailable == SourceFailurePolicy::Abort
        {
            bail!("data source unavailable; aborting at cycle {cycle}");
        }

        self.cycle += 1;
        let report = CycleReport {
            cycle,
            telemetry_rows: chain.len() - failed_rows,
            failed_rows,
            graph_manager_rows,
            monitor_started,
            persisted,
            persist_failures,
        };
        debug!(
            cycle,
            telemetry_rows = report.telemetry_rows,
            failed_rows,
            graph_manager_rows,
            monitor_started,
            persisted = report.persisted.len(),
            persist_failures,
            "cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until shutdown is signalled or `max_cycles` have run.
    ///
    /// The shutdown signal is checked at each cycle boundary; a cycle in
    /// progress always completes. Returns the number of cycles run.
    pub async fn run(
        &mut self,
        shutdown: watch::Receiver<bool>,
        max_cycles: Option<u64>,
    ) -> anyhow::Result<u64> {
        info!(?max_cycles, "orchestrator started");
        let started = self.cycle;

        let outcome = loop {
            if *shutdown.borrow() {
                info!(cycle = self.cycle, "shutdown requested, stopping at cycle boundary");
                break Ok(());
            }
            if max_cycles.is_some_and(|max| self.cycle - started >= max) {
                break Ok(());
            }
            if let Err(e) = self.run_cycle().await {
                error!(cycle = self.cycle, error = %e, "orchestrator stopped");
                break Err(e);
            }
            if self.pacing.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.pacing).await;
            }
        };

        self.drain().await;
        info!(cycles = self.cycle - started, "orchestrator finished");
        outcome.map(|()| self.cycle - started)
    }

    /// Wait for a background monitor evaluation, if one is running.
    pub async fn drain(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "robustness monitor task aborted");
            }
        }
    }
}
