//! Table manager: creates the telemetry, result, and control tables.

use std::sync::Arc;

use tracing::info;

use ami_core::{Population, TableKind};

use crate::error::TableResult;
use crate::schema::{ColumnSchema, ColumnSpace};
use crate::table::{RowIndexSpace, Table};

/// Creates tables sized to the entity population.
#[derive(Debug, Clone)]
pub struct TableManager {
    samples_per_entity: usize,
}

impl TableManager {
    pub fn new(samples_per_entity: usize) -> Self {
        Self { samples_per_entity }
    }

    pub fn samples_per_entity(&self) -> usize {
        self.samples_per_entity
    }

    /// Create one table with `entity_count` entity slots.
    ///
    /// Row bounds are `[0, entity_count-1] × [0, samples_per_entity-1]`.
    pub fn create_table(&self, kind: TableKind, entity_count: usize) -> TableResult<Table> {
        let name = kind.name();
        let index_space = RowIndexSpace::new(
            format!("{name}_index_space"),
            entity_count,
            self.samples_per_entity,
        )?;
        let mut column_space = ColumnSpace::new(format!("{name}_columns"));
        let schema = ColumnSchema::build(kind, &mut column_space)?;
        let table = Table::new(kind, name.to_string(), index_space, column_space, schema);

        info!(
            table = %table.name(),
            index_space = %table.index_space().name(),
            column_space = %table.column_space().name(),
            entities = entity_count,
            samples = self.samples_per_entity,
            "table created"
        );
        Ok(table)
    }

    /// Create all three tables for a population. Called once at startup.
    pub fn create_all_tables(&self, population: &Population) -> TableResult<TableSet> {
        let entities = population.entity_count();
        Ok(TableSet {
            telemetry: Arc::new(self.create_table(TableKind::Telemetry, entities)?),
            result: Arc::new(self.create_table(TableKind::Result, entities)?),
            control: Arc::new(self.create_table(TableKind::Control, entities)?),
        })
    }
}

/// The three tables of one pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TableSet {
    pub telemetry: Arc<Table>,
    pub result: Arc<Table>,
    pub control: Arc<Table>,
}

impl TableSet {
    pub fn get(&self, kind: TableKind) -> &Arc<Table> {
        match kind {
            TableKind::Telemetry => &self.telemetry,
            TableKind::Result => &self.result,
            TableKind::Control => &self.control,
        }
    }

    /// Tables in persist order: telemetry, result, control.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Table>> {
        TableKind::ALL.into_iter().map(|kind| self.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;

    #[test]
    fn entity_dimension_matches_count() {
        let manager = TableManager::new(128);
        for n in [1usize, 2, 7, 1028] {
            let table = manager.create_table(TableKind::Telemetry, n).unwrap();
            assert_eq!(table.index_space().entities(), n);
            assert_eq!(table.partition().subregion_count(), n);
        }
    }

    #[test]
    fn entity_dimension_independent_of_sample_capacity() {
        for samples in [1usize, 16, 128] {
            let table = TableManager::new(samples)
                .create_table(TableKind::Result, 5)
                .unwrap();
            assert_eq!(table.index_space().entities(), 5);
            assert_eq!(table.index_space().samples(), samples);
        }
    }

    #[test]
    fn names_attached() {
        let table = TableManager::new(4)
            .create_table(TableKind::Control, 1)
            .unwrap();
        assert_eq!(table.name(), "control");
        assert_eq!(table.index_space().name(), "control_index_space");
        assert_eq!(table.column_space().name(), "control_columns");
    }

    #[test]
    fn zero_entities_rejected() {
        assert!(matches!(
            TableManager::new(4).create_table(TableKind::Telemetry, 0),
            Err(TableError::EmptyIndexSpace)
        ));
    }

    #[test]
    fn all_tables_share_population_size() {
        let population = Population::new(2, 1, 1, 1024);
        let tables = TableManager::new(8).create_all_tables(&population).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["telemetry", "result", "control"]);
        for table in tables.iter() {
            assert_eq!(table.index_space().entities(), 1028);
        }
    }
}
