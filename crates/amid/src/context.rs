//! Pipeline context: everything a cycle needs, built once at startup.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tracing::info;

use ami_core::{AmiConfig, Population, SourceKind};
use ami_health::RobustnessMonitor;
use ami_scheduler::{StageInvoker, StageRegistry};
use ami_source::{DataSource, SegmentRegistry, SourceState};
use ami_table::{SnapshotManager, TableManager, TableSet};

use crate::stages::{self, StageValue};

/// Shared pipeline state, passed explicitly to the orchestrator.
pub struct PipelineContext {
    pub config: AmiConfig,
    pub population: Population,
    pub tables: TableSet,
    pub source: Arc<Mutex<DataSource>>,
    pub segments: SegmentRegistry,
    pub snapshots: Arc<SnapshotManager>,
    pub monitor: Arc<RobustnessMonitor>,
    pub invoker: StageInvoker<StageValue>,
}

impl PipelineContext {
    /// Create the tables, select the data source, and register every stage.
    ///
    /// A configured file path base selects the file-backed source; without
    /// one the shared-memory segment from the config is used. Table schema
    /// drift is fatal here.
    pub fn bootstrap(config: AmiConfig, segments: SegmentRegistry) -> anyhow::Result<Self> {
        config.validate()?;
        let population = config.population;

        let tables = TableManager::new(config.tables.samples_per_entity as usize)
            .create_all_tables(&population)
            .context("failed to create pipeline tables")?;

        let mut source = match config.source.file_path_base.as_deref() {
            Some(base) => {
                let mut source = DataSource::file();
                source.select(base)?;
                source
            }
            None => {
                let mut source = DataSource::shared_memory(segments.clone());
                source.select(&config.source.shared_memory_segment)?;
                source
            }
        };
        if source.kind() == SourceKind::SharedMemory {
            // Attaching to a segment cannot fail, so do it up front.
            source.open()?;
        }
        let source = Arc::new(Mutex::new(source));

        let monitor = Arc::new(RobustnessMonitor::new(
            population,
            config.monitor.stale_threshold,
        ));
        let snapshots = Arc::new(SnapshotManager::new(config.persist.dir.clone()));

        let mut registry = StageRegistry::new();
        stages::register_all(
            &mut registry,
            Arc::clone(&source),
            &tables,
            population,
            Arc::clone(&monitor),
        )?;

        info!(
            workers = population.workers,
            graph_managers = population.graph_managers,
            monitors = population.monitors,
            entities = population.entity_count(),
            persist_dir = ?config.persist.dir,
            "pipeline bootstrapped"
        );

        Ok(Self {
            config,
            population,
            tables,
            source,
            segments,
            snapshots,
            monitor,
            invoker: StageInvoker::new(registry),
        })
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kind()
    }

    pub fn source_state(&self) -> SourceState {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn source_open_count(&self) -> u32 {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open_count()
    }

    /// Close a failed source so the next invocation reopens it.
    pub fn reset_source(&self) {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}
