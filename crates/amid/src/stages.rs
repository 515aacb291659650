//! Stage handlers for the telemetry chain, graph managers, and monitors.
//!
//! Every handler owns clones of the shared tables it touches. Handlers run
//! on the blocking pool and only ever write their own entity's row.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::debug;

use ami_core::{EntityKind, EntitySlot, Population, SourceKind, StageId};
use ami_health::{HealthStatus, HealthVerdict, RobustnessMonitor};
use ami_scheduler::{SchedulerResult, Stage, StageCall, StageRegistry};
use ami_source::{DataSource, TelemetryFrame};
use ami_table::TableSet;

/// Per-row result passed between stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageValue {
    Empty,
    Frame(TelemetryFrame),
    Aggregate { timestamp: i32, value: i32 },
    Verdicts(Vec<HealthVerdict>),
}

/// Cycle number as stored in an i32 timestamp cell.
fn cycle_stamp(cycle: u64) -> i32 {
    i32::try_from(cycle).unwrap_or(i32::MAX)
}

fn entity_row(population: &Population, kind: EntityKind, index: u32) -> anyhow::Result<usize> {
    let slot = EntitySlot::new(kind, index);
    population
        .row_of(slot)
        .with_context(|| format!("{slot} is outside the configured population"))
}

/// Produces one frame per worker row and records it in telemetry.
pub struct DataSourceStage {
    source: Arc<Mutex<DataSource>>,
    tables: TableSet,
    population: Population,
}

impl DataSourceStage {
    pub fn new(source: Arc<Mutex<DataSource>>, tables: TableSet, population: Population) -> Self {
        Self {
            source,
            tables,
            population,
        }
    }
}

impl Stage<StageValue> for DataSourceStage {
    fn run(&self, call: &StageCall, _input: Option<StageValue>) -> anyhow::Result<StageValue> {
        let row = entity_row(&self.population, EntityKind::Worker, call.index)?;
        let frame = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .produce_frame()?;

        match frame {
            Some(frame) => {
                self.tables
                    .telemetry
                    .append(row, frame.timestamp, frame.data)?;
                Ok(StageValue::Frame(frame))
            }
            None => Ok(StageValue::Empty),
        }
    }
}

/// Reduces a worker's telemetry window to one aggregate.
pub struct WorkerStage {
    tables: TableSet,
    population: Population,
}

impl WorkerStage {
    pub fn new(tables: TableSet, population: Population) -> Self {
        Self { tables, population }
    }
}

impl Stage<StageValue> for WorkerStage {
    fn run(&self, call: &StageCall, input: Option<StageValue>) -> anyhow::Result<StageValue> {
        let frame = match input {
            Some(StageValue::Frame(frame)) => frame,
            Some(StageValue::Empty) | None => return Ok(StageValue::Empty),
            Some(other) => bail!("worker expects a frame, got {other:?}"),
        };
        let row = entity_row(&self.population, EntityKind::Worker, call.index)?;
        let value = self
            .tables
            .telemetry
            .samples(row)?
            .into_iter()
            .fold(0i32, |acc, (_, data)| acc.saturating_add(data));
        Ok(StageValue::Aggregate {
            timestamp: frame.timestamp,
            value,
        })
    }
}

/// Appends worker aggregates to the result table.
pub struct CollectorStage {
    tables: TableSet,
    population: Population,
}

impl CollectorStage {
    pub fn new(tables: TableSet, population: Population) -> Self {
        Self { tables, population }
    }
}

impl Stage<StageValue> for CollectorStage {
    fn run(&self, call: &StageCall, input: Option<StageValue>) -> anyhow::Result<StageValue> {
        match input {
            Some(StageValue::Aggregate { timestamp, value }) => {
                let row = entity_row(&self.population, EntityKind::Worker, call.index)?;
                self.tables.result.append(row, timestamp, value)?;
                Ok(StageValue::Empty)
            }
            Some(StageValue::Empty) | None => Ok(StageValue::Empty),
            Some(other) => bail!("collector expects an aggregate, got {other:?}"),
        }
    }
}

/// Advances each graph manager's revision and records it in control.
pub struct GraphManagerStage {
    tables: TableSet,
    population: Population,
    revisions: Vec<AtomicU64>,
}

impl GraphManagerStage {
    pub fn new(tables: TableSet, population: Population) -> Self {
        let revisions = (0..population.graph_managers)
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            tables,
            population,
            revisions,
        }
    }

    pub fn revision(&self, index: u32) -> Option<u64> {
        self.revisions
            .get(index as usize)
            .map(|r| r.load(Ordering::Acquire))
    }
}

impl Stage<StageValue> for GraphManagerStage {
    fn run(&self, call: &StageCall, _input: Option<StageValue>) -> anyhow::Result<StageValue> {
        let row = entity_row(&self.population, EntityKind::GraphManager, call.index)?;
        let revision = self
            .revisions
            .get(call.index as usize)
            .with_context(|| format!("no revision counter for graph manager {}", call.index))?
            .fetch_add(1, Ordering::AcqRel)
            + 1;
        self.tables
            .control
            .append(row, cycle_stamp(call.cycle), cycle_stamp(revision))?;
        debug!(index = call.index, revision, "graph revision advanced");
        Ok(StageValue::Empty)
    }
}

/// Runs one robustness evaluation per monitor row.
pub struct MonitorStage {
    monitor: Arc<RobustnessMonitor>,
    tables: TableSet,
    population: Population,
}

impl MonitorStage {
    pub fn new(monitor: Arc<RobustnessMonitor>, tables: TableSet, population: Population) -> Self {
        Self {
            monitor,
            tables,
            population,
        }
    }
}

impl Stage<StageValue> for MonitorStage {
    fn run(&self, call: &StageCall, _input: Option<StageValue>) -> anyhow::Result<StageValue> {
        let row = entity_row(&self.population, EntityKind::RobustnessMonitor, call.index)?;
        let verdicts = self.monitor.evaluate(call.index, &self.tables);
        let unhealthy = verdicts
            .iter()
            .filter(|v| v.status == HealthStatus::Unhealthy)
            .count();
        self.tables.control.append(
            row,
            cycle_stamp(call.cycle),
            i32::try_from(unhealthy).unwrap_or(i32::MAX),
        )?;
        Ok(StageValue::Verdicts(verdicts))
    }
}

/// Register every pipeline stage. Both data source ids share one handler
/// that reads through whichever variant is selected.
pub fn register_all(
    registry: &mut StageRegistry<StageValue>,
    source: Arc<Mutex<DataSource>>,
    tables: &TableSet,
    population: Population,
    monitor: Arc<RobustnessMonitor>,
) -> SchedulerResult<()> {
    let data_source: Arc<dyn Stage<StageValue>> = Arc::new(DataSourceStage::new(
        source,
        tables.clone(),
        population,
    ));
    registry.register_arc(StageId::DataSource(SourceKind::File), Arc::clone(&data_source))?;
    registry.register_arc(StageId::DataSource(SourceKind::SharedMemory), data_source)?;
    registry.register(StageId::Worker, WorkerStage::new(tables.clone(), population))?;
    registry.register(StageId::Collector, CollectorStage::new(tables.clone(), population))?;
    registry.register(
        StageId::GraphManager,
        GraphManagerStage::new(tables.clone(), population),
    )?;
    registry.register(
        StageId::RobustnessMonitor,
        MonitorStage::new(monitor, tables.clone(), population),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_source::SegmentRegistry;
    use ami_table::TableManager;

    fn call(stage: StageId, index: u32, cycle: u64) -> StageCall {
        StageCall { stage, index, cycle }
    }

    fn fixture(population: &Population) -> TableSet {
        TableManager::new(4).create_all_tables(population).unwrap()
    }

    #[test]
    fn data_source_appends_to_worker_row() {
        let population = Population::new(2, 1, 1, 0);
        let tables = fixture(&population);
        let segments = SegmentRegistry::new();
        segments.segment("ami").push(TelemetryFrame::new(7, 70));
        let mut source = DataSource::shared_memory(segments);
        source.select("ami").unwrap();
        let stage = DataSourceStage::new(Arc::new(Mutex::new(source)), tables.clone(), population);

        let value = stage
            .run(&call(StageId::DataSource(SourceKind::SharedMemory), 1, 0), None)
            .unwrap();
        assert_eq!(value, StageValue::Frame(TelemetryFrame::new(7, 70)));
        assert_eq!(tables.telemetry.latest(1).unwrap(), Some((7, 70)));
        assert_eq!(tables.telemetry.write_count(0), 0);

        let value = stage
            .run(&call(StageId::DataSource(SourceKind::SharedMemory), 0, 0), None)
            .unwrap();
        assert_eq!(value, StageValue::Empty);
    }

    #[test]
    fn worker_sums_window_saturating() {
        let population = Population::new(1, 0, 0, 1);
        let tables = fixture(&population);
        tables.telemetry.append(0, 1, i32::MAX).unwrap();
        tables.telemetry.append(0, 2, 5).unwrap();
        let stage = WorkerStage::new(tables, population);

        let value = stage
            .run(
                &call(StageId::Worker, 0, 0),
                Some(StageValue::Frame(TelemetryFrame::new(2, 5))),
            )
            .unwrap();
        assert_eq!(
            value,
            StageValue::Aggregate {
                timestamp: 2,
                value: i32::MAX
            }
        );
        assert_eq!(
            stage.run(&call(StageId::Worker, 0, 0), Some(StageValue::Empty)).unwrap(),
            StageValue::Empty
        );
    }

    #[test]
    fn collector_records_aggregate() {
        let population = Population::new(1, 0, 0, 1);
        let tables = fixture(&population);
        let stage = CollectorStage::new(tables.clone(), population);
        stage
            .run(
                &call(StageId::Collector, 0, 0),
                Some(StageValue::Aggregate {
                    timestamp: 9,
                    value: 90,
                }),
            )
            .unwrap();
        assert_eq!(tables.result.latest(0).unwrap(), Some((9, 90)));
        assert!(
            stage
                .run(
                    &call(StageId::Collector, 0, 0),
                    Some(StageValue::Frame(TelemetryFrame::new(1, 1)))
                )
                .is_err()
        );
    }

    #[test]
    fn graph_manager_bumps_revision() {
        let population = Population::new(1, 2, 0, 0);
        let tables = fixture(&population);
        let stage = GraphManagerStage::new(tables.clone(), population);
        stage.run(&call(StageId::GraphManager, 1, 4), None).unwrap();
        stage.run(&call(StageId::GraphManager, 1, 5), None).unwrap();
        assert_eq!(stage.revision(1), Some(2));
        assert_eq!(stage.revision(0), Some(0));
        // Graph manager 1 sits after the single worker and graph manager 0.
        assert_eq!(tables.control.samples(2).unwrap(), vec![(4, 1), (5, 2)]);
    }

    #[test]
    fn monitor_records_unhealthy_count() {
        let population = Population::new(1, 0, 1, 0);
        let tables = fixture(&population);
        let monitor = Arc::new(RobustnessMonitor::new(population, 1));
        let stage = MonitorStage::new(Arc::clone(&monitor), tables.clone(), population);

        tables.telemetry.append(0, 1, 1).unwrap();
        stage.run(&call(StageId::RobustnessMonitor, 0, 0), None).unwrap();
        let value = stage.run(&call(StageId::RobustnessMonitor, 0, 1), None).unwrap();
        match value {
            StageValue::Verdicts(verdicts) => {
                assert_eq!(verdicts.len(), 1);
                assert_eq!(verdicts[0].status, HealthStatus::Unhealthy);
            }
            other => panic!("unexpected value {other:?}"),
        }
        assert_eq!(tables.control.samples(1).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn every_stage_is_registered_once() {
        let population = Population::new(1, 1, 1, 0);
        let tables = fixture(&population);
        let source = Arc::new(Mutex::new(DataSource::file()));
        let monitor = Arc::new(RobustnessMonitor::new(population, 3));
        let mut registry = StageRegistry::new();
        register_all(&mut registry, source, &tables, population, monitor).unwrap();
        assert_eq!(registry.registered().len(), 6);
    }
}
