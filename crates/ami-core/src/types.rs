//! Shared types used across AMI crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default fixed client capacity reserved in every table.
pub const DEFAULT_MAX_CLIENTS: u32 = 1024;

/// Default number of sample slots per entity row.
pub const DEFAULT_SAMPLES_PER_ENTITY: u32 = 128;

// ── Tables ─────────────────────────────────────────────────────────

/// The three independent tables every pipeline owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Telemetry,
    Result,
    Control,
}

impl TableKind {
    /// Fixed order used for creation and for every persist cycle.
    pub const ALL: [TableKind; 3] = [TableKind::Telemetry, TableKind::Result, TableKind::Control];

    /// Table name; also the name of its external snapshot file.
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Telemetry => "telemetry",
            TableKind::Result => "result",
            TableKind::Control => "control",
        }
    }

    /// First column id owned by this kind. Each kind owns four consecutive ids.
    pub fn column_base(self) -> u32 {
        match self {
            TableKind::Telemetry => 0,
            TableKind::Result => 4,
            TableKind::Control => 8,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Entities ───────────────────────────────────────────────────────

/// Owner of a row range in every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Worker,
    GraphManager,
    RobustnessMonitor,
    Client,
}

/// One entity: its kind plus its index among entities of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitySlot {
    pub kind: EntityKind,
    pub index: u32,
}

impl EntitySlot {
    pub fn new(kind: EntityKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for EntitySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntityKind::Worker => "worker",
            EntityKind::GraphManager => "graph-manager",
            EntityKind::RobustnessMonitor => "monitor",
            EntityKind::Client => "client",
        };
        write!(f, "{kind}-{}", self.index)
    }
}

/// Configured entity population. Fixed for the lifetime of a pipeline.
///
/// Rows are laid out contiguously in kind order: workers, graph managers,
/// robustness monitors, then client slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Population {
    pub workers: u32,
    pub graph_managers: u32,
    pub monitors: u32,
    pub max_clients: u32,
}

impl Default for Population {
    fn default() -> Self {
        Self {
            workers: 1,
            graph_managers: 1,
            monitors: 1,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

impl Population {
    pub fn new(workers: u32, graph_managers: u32, monitors: u32, max_clients: u32) -> Self {
        Self {
            workers,
            graph_managers,
            monitors,
            max_clients,
        }
    }

    /// Total number of entity slots, i.e. rows in dimension 0 of every table.
    pub fn entity_count(&self) -> usize {
        self.workers as usize
            + self.graph_managers as usize
            + self.monitors as usize
            + self.max_clients as usize
    }

    /// Number of entities of one kind.
    pub fn count(&self, kind: EntityKind) -> u32 {
        match kind {
            EntityKind::Worker => self.workers,
            EntityKind::GraphManager => self.graph_managers,
            EntityKind::RobustnessMonitor => self.monitors,
            EntityKind::Client => self.max_clients,
        }
    }

    fn offset(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Worker => 0,
            EntityKind::GraphManager => self.workers as usize,
            EntityKind::RobustnessMonitor => self.workers as usize + self.graph_managers as usize,
            EntityKind::Client => {
                self.workers as usize + self.graph_managers as usize + self.monitors as usize
            }
        }
    }

    /// Entity row of a slot, or `None` if the index exceeds the configured count.
    pub fn row_of(&self, slot: EntitySlot) -> Option<usize> {
        (slot.index < self.count(slot.kind)).then(|| self.offset(slot.kind) + slot.index as usize)
    }

    /// Inverse of [`Population::row_of`].
    pub fn slot_of(&self, row: usize) -> Option<EntitySlot> {
        [
            EntityKind::Worker,
            EntityKind::GraphManager,
            EntityKind::RobustnessMonitor,
            EntityKind::Client,
        ]
        .into_iter()
        .find_map(|kind| {
            let start = self.offset(kind);
            let end = start + self.count(kind) as usize;
            (start..end)
                .contains(&row)
                .then(|| EntitySlot::new(kind, (row - start) as u32))
        })
    }
}

// ── Stages ─────────────────────────────────────────────────────────

/// Which transport a data source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    SharedMemory,
}

/// Identifier of a registered fan-out stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    DataSource(SourceKind),
    Worker,
    Collector,
    GraphManager,
    RobustnessMonitor,
}

impl StageId {
    pub fn name(self) -> &'static str {
        match self {
            StageId::DataSource(SourceKind::File) => "file_data_source_task",
            StageId::DataSource(SourceKind::SharedMemory) => "shared_memory_data_source_task",
            StageId::Worker => "worker_task",
            StageId::Collector => "collector_task",
            StageId::GraphManager => "graph_manager_task",
            StageId::RobustnessMonitor => "robustness_monitor_task",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_count_includes_client_capacity() {
        let population = Population::new(2, 1, 1, 1024);
        assert_eq!(population.entity_count(), 1028);
    }

    #[test]
    fn rows_are_contiguous_in_kind_order() {
        let population = Population::new(2, 1, 1, 3);
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::Worker, 0)), Some(0));
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::Worker, 1)), Some(1));
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::GraphManager, 0)), Some(2));
        assert_eq!(
            population.row_of(EntitySlot::new(EntityKind::RobustnessMonitor, 0)),
            Some(3)
        );
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::Client, 2)), Some(6));
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::Worker, 2)), None);
    }

    #[test]
    fn offsets_do_not_overflow_u32() {
        let max = u32::MAX as usize;
        let population = Population::new(u32::MAX, u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(population.entity_count(), 4 * max);
        assert_eq!(
            population.row_of(EntitySlot::new(EntityKind::RobustnessMonitor, 0)),
            Some(2 * max)
        );
        assert_eq!(population.row_of(EntitySlot::new(EntityKind::Client, 1)), Some(3 * max + 1));
        assert_eq!(
            population.slot_of(3 * max),
            Some(EntitySlot::new(EntityKind::Client, 0))
        );
    }

    #[test]
    fn slot_of_inverts_row_of() {
        let population = Population::new(3, 2, 2, 4);
        for row in 0..population.entity_count() {
            let slot = population.slot_of(row).unwrap();
            assert_eq!(population.row_of(slot), Some(row));
        }
        assert_eq!(population.slot_of(population.entity_count()), None);
    }

    #[test]
    fn zero_sized_kinds_are_skipped() {
        let population = Population::new(1, 0, 1, 0);
        assert_eq!(
            population.slot_of(1),
            Some(EntitySlot::new(EntityKind::RobustnessMonitor, 0))
        );
    }

    #[test]
    fn column_bases_do_not_overlap() {
        let bases: Vec<u32> = TableKind::ALL.iter().map(|k| k.column_base()).collect();
        assert_eq!(bases, vec![0, 4, 8]);
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(StageId::Worker.to_string(), "worker_task");
        assert_eq!(
            StageId::DataSource(SourceKind::File).name(),
            "file_data_source_task"
        );
    }
}
