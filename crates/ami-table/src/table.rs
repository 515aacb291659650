//! Partitioned, double-buffered tables.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ami_core::TableKind;

use crate::error::{TableError, TableResult};
use crate::schema::{ColumnId, ColumnRole, ColumnSchema, ColumnSpace};

/// 2-D row index space: `[0, entities-1] × [0, samples-1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIndexSpace {
    name: String,
    entities: usize,
    samples: usize,
}

impl RowIndexSpace {
    pub fn new(name: impl Into<String>, entities: usize, samples: usize) -> TableResult<Self> {
        if entities == 0 || samples == 0 {
            return Err(TableError::EmptyIndexSpace);
        }
        Ok(Self {
            name: name.into(),
            entities,
            samples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values in dimension 0.
    pub fn entities(&self) -> usize {
        self.entities
    }

    /// Number of values in dimension 1.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Inclusive `(low, high)` corners.
    pub fn bounds(&self) -> ((usize, usize), (usize, usize)) {
        ((0, 0), (self.entities - 1, self.samples - 1))
    }

    pub fn len(&self) -> usize {
        self.entities * self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entity: usize, sample: usize) -> bool {
        entity < self.entities && sample < self.samples
    }

    fn offset(&self, entity: usize, sample: usize) -> TableResult<usize> {
        if self.contains(entity, sample) {
            Ok(entity * self.samples + sample)
        } else {
            Err(TableError::OutOfBounds { entity, sample })
        }
    }
}

/// Logical partition grouping cells by entity slot.
///
/// Subregion `e` covers every sample slot of entity `e`, so one stage
/// invocation addresses exactly one subregion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPartition {
    entities: usize,
    samples: usize,
}

impl EntityPartition {
    pub fn by_entity(space: &RowIndexSpace) -> Self {
        Self {
            entities: space.entities,
            samples: space.samples,
        }
    }

    pub fn subregion_count(&self) -> usize {
        self.entities
    }

    /// Linear cell range owned by `entity`.
    pub fn subregion(&self, entity: usize) -> Option<Range<usize>> {
        (entity < self.entities).then(|| entity * self.samples..(entity + 1) * self.samples)
    }
}

struct Column {
    id: ColumnId,
    role: ColumnRole,
    cells: RwLock<Vec<i32>>,
}

impl Column {
    fn read(&self) -> RwLockReadGuard<'_, Vec<i32>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<i32>> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Guard<'a> {
    Read(RwLockReadGuard<'a, Vec<i32>>),
    Write(RwLockWriteGuard<'a, Vec<i32>>),
}

impl Guard<'_> {
    fn cells(&self) -> &[i32] {
        match self {
            Guard::Read(g) => g.as_slice(),
            Guard::Write(g) => g.as_slice(),
        }
    }
}

/// A partitioned table with paired persistent and shadow columns.
pub struct Table {
    kind: TableKind,
    name: String,
    index_space: RowIndexSpace,
    column_space: ColumnSpace,
    schema: ColumnSchema,
    partition: EntityPartition,
    /// Columns in allocation order.
    columns: Vec<Column>,
    /// Appends per entity since creation.
    write_counts: Vec<AtomicU64>,
}

impl Table {
    pub(crate) fn new(
        kind: TableKind,
        name: String,
        index_space: RowIndexSpace,
        column_space: ColumnSpace,
        schema: ColumnSchema,
    ) -> Self {
        let len = index_space.len();
        let columns = ColumnRole::ORDER
            .into_iter()
            .map(|role| Column {
                id: schema.column(role),
                role,
                cells: RwLock::new(vec![0; len]),
            })
            .collect();
        let write_counts = (0..index_space.entities())
            .map(|_| AtomicU64::new(0))
            .collect();
        let partition = EntityPartition::by_entity(&index_space);
        Self {
            kind,
            name,
            index_space,
            column_space,
            schema,
            partition,
            columns,
            write_counts,
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_space(&self) -> &RowIndexSpace {
        &self.index_space
    }

    pub fn column_space(&self) -> &ColumnSpace {
        &self.column_space
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn partition(&self) -> &EntityPartition {
        &self.partition
    }

    fn column(&self, id: ColumnId) -> TableResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.id == id)
            .ok_or(TableError::UnknownColumn(id))
    }

    fn role_column(&self, role: ColumnRole) -> &Column {
        &self.columns[role.offset() as usize]
    }

    /// Write one persistent cell. Shadow columns are rejected.
    pub fn write_cell(
        &self,
        id: ColumnId,
        entity: usize,
        sample: usize,
        value: i32,
    ) -> TableResult<()> {
        let column = self.column(id)?;
        if column.role.is_shadow() {
            return Err(TableError::ShadowWrite(id));
        }
        let offset = self.index_space.offset(entity, sample)?;
        column.write()[offset] = value;
        Ok(())
    }

    pub fn read_cell(&self, id: ColumnId, entity: usize, sample: usize) -> TableResult<i32> {
        let column = self.column(id)?;
        let offset = self.index_space.offset(entity, sample)?;
        Ok(column.read()[offset])
    }

    /// Append a `(timestamp, data)` sample to an entity's ring of sample
    /// slots. Returns the sample slot written.
    pub fn append(&self, entity: usize, timestamp: i32, data: i32) -> TableResult<usize> {
        let counter = self
            .write_counts
            .get(entity)
            .ok_or(TableError::OutOfBounds { entity, sample: 0 })?;
        let sample = (counter.load(Ordering::Acquire) % self.index_space.samples() as u64) as usize;
        let offset = self.index_space.offset(entity, sample)?;
        {
            let mut ts = self.role_column(ColumnRole::Timestamp).write();
            let mut data_cells = self.role_column(ColumnRole::Data).write();
            ts[offset] = timestamp;
            data_cells[offset] = data;
        }
        counter.fetch_add(1, Ordering::AcqRel);
        Ok(sample)
    }

    /// Number of appends made to an entity row.
    pub fn write_count(&self, entity: usize) -> u64 {
        self.write_counts
            .get(entity)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Filled `(timestamp, data)` samples of an entity, oldest first.
    pub fn samples(&self, entity: usize) -> TableResult<Vec<(i32, i32)>> {
        let range = self
            .partition
            .subregion(entity)
            .ok_or(TableError::OutOfBounds { entity, sample: 0 })?;
        let capacity = self.index_space.samples();
        let written = self.write_count(entity);
        let filled = written.min(capacity as u64) as usize;
        let start = if written as usize > capacity {
            (written % capacity as u64) as usize
        } else {
            0
        };

        let ts = self.role_column(ColumnRole::Timestamp).read();
        let data = self.role_column(ColumnRole::Data).read();
        let row_ts = &ts[range.clone()];
        let row_data = &data[range];
        Ok((0..filled)
            .map(|i| {
                let slot = (start + i) % capacity;
                (row_ts[slot], row_data[slot])
            })
            .collect())
    }

    /// Most recent sample of an entity, if any.
    pub fn latest(&self, entity: usize) -> TableResult<Option<(i32, i32)>> {
        Ok(self.samples(entity)?.last().copied())
    }

    /// Copy of every cell in a column.
    pub fn column_values(&self, id: ColumnId) -> TableResult<Vec<i32>> {
        Ok(self.column(id)?.read().clone())
    }

    /// Copy each persistent column into its paired shadow column as one
    /// batched operation and return the resulting shadow contents.
    ///
    /// Locks are taken in column id order: shared on sources, exclusive on
    /// destinations. No persistent cell is modified.
    pub(crate) fn copy_columns(
        &self,
        pairs: &[(ColumnId, ColumnId)],
    ) -> TableResult<Vec<(ColumnId, Vec<i32>)>> {
        for &(src, dst) in pairs {
            let src_col = self.column(src)?;
            let dst_col = self.column(dst)?;
            if src_col.role.is_shadow()
                || !dst_col.role.is_shadow()
                || src_col.role.offset() + 1 != dst_col.role.offset()
            {
                return Err(TableError::InvalidCopyPair { src, dst });
            }
        }

        let mut ids: Vec<ColumnId> = pairs.iter().flat_map(|&(s, d)| [s, d]).collect();
        ids.sort();
        ids.dedup();

        let mut guards: Vec<(ColumnId, Guard<'_>)> = Vec::with_capacity(ids.len());
        for id in ids {
            let column = self.column(id)?;
            let guard = if column.role.is_shadow() {
                Guard::Write(column.write())
            } else {
                Guard::Read(column.read())
            };
            guards.push((id, guard));
        }

        let mut forked = Vec::with_capacity(pairs.len());
        for &(src, dst) in pairs {
            let source: Vec<i32> = guards
                .iter()
                .find(|(id, _)| *id == src)
                .map(|(_, g)| g.cells().to_vec())
                .ok_or(TableError::UnknownColumn(src))?;
            let (_, target) = guards
                .iter_mut()
                .find(|(id, _)| *id == dst)
                .ok_or(TableError::UnknownColumn(dst))?;
            if let Guard::Write(cells) = target {
                cells.copy_from_slice(&source);
            }
            forked.push((dst, source));
        }
        Ok(forked)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("entities", &self.index_space.entities())
            .field("samples", &self.index_space.samples())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_table(entities: usize, samples: usize) -> Table {
        let kind = TableKind::Telemetry;
        let space = RowIndexSpace::new("telemetry_index_space", entities, samples).unwrap();
        let mut columns = ColumnSpace::new("telemetry_columns");
        let schema = ColumnSchema::build(kind, &mut columns).unwrap();
        Table::new(kind, "telemetry".to_string(), space, columns, schema)
    }

    #[test]
    fn index_space_bounds() {
        let space = RowIndexSpace::new("x", 5, 128).unwrap();
        assert_eq!(space.bounds(), ((0, 0), (4, 127)));
        assert_eq!(space.len(), 640);
        assert!(space.contains(4, 127));
        assert!(!space.contains(5, 0));
    }

    #[test]
    fn empty_index_space_rejected() {
        assert!(matches!(
            RowIndexSpace::new("x", 0, 8),
            Err(TableError::EmptyIndexSpace)
        ));
    }

    #[test]
    fn partition_subregions_cover_one_entity_each() {
        let space = RowIndexSpace::new("x", 3, 4).unwrap();
        let partition = EntityPartition::by_entity(&space);
        assert_eq!(partition.subregion_count(), 3);
        assert_eq!(partition.subregion(1), Some(4..8));
        assert_eq!(partition.subregion(3), None);
    }

    #[test]
    fn write_and_read_persistent_cell() {
        let table = test_table(2, 4);
        let ts = table.schema().column(ColumnRole::Timestamp);
        table.write_cell(ts, 1, 3, 42).unwrap();
        assert_eq!(table.read_cell(ts, 1, 3).unwrap(), 42);
        assert_eq!(table.read_cell(ts, 0, 3).unwrap(), 0);
    }

    #[test]
    fn shadow_write_rejected() {
        let table = test_table(2, 4);
        let shadow = table.schema().column(ColumnRole::DataShadow);
        assert!(matches!(
            table.write_cell(shadow, 0, 0, 1),
            Err(TableError::ShadowWrite(_))
        ));
    }

    #[test]
    fn out_of_bounds_rejected() {
        let table = test_table(2, 4);
        let data = table.schema().column(ColumnRole::Data);
        assert!(matches!(
            table.write_cell(data, 2, 0, 1),
            Err(TableError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn append_wraps_ring_and_keeps_order() {
        let table = test_table(1, 3);
        for i in 0..5 {
            table.append(0, i, i * 10).unwrap();
        }
        assert_eq!(table.write_count(0), 5);
        assert_eq!(table.samples(0).unwrap(), vec![(2, 20), (3, 30), (4, 40)]);
        assert_eq!(table.latest(0).unwrap(), Some((4, 40)));
    }

    #[test]
    fn append_is_isolated_per_entity() {
        let table = test_table(2, 4);
        table.append(1, 7, 70).unwrap();
        assert!(table.samples(0).unwrap().is_empty());
        assert_eq!(table.samples(1).unwrap(), vec![(7, 70)]);
    }

    #[test]
    fn copy_forks_persistent_into_shadow() {
        let table = test_table(2, 2);
        table.append(0, 1, 11).unwrap();
        table.append(1, 2, 22).unwrap();

        let forked = table.copy_columns(&table.schema().pairs()).unwrap();
        assert_eq!(forked.len(), 2);

        let schema = table.schema();
        assert_eq!(
            table.column_values(schema.column(ColumnRole::TimestampShadow)).unwrap(),
            table.column_values(schema.column(ColumnRole::Timestamp)).unwrap()
        );
        assert_eq!(
            table.column_values(schema.column(ColumnRole::DataShadow)).unwrap(),
            vec![11, 0, 22, 0]
        );

        // Later writes do not leak into the shadow.
        table.append(0, 3, 33).unwrap();
        assert_eq!(
            table.column_values(schema.column(ColumnRole::DataShadow)).unwrap(),
            vec![11, 0, 22, 0]
        );
    }

    #[test]
    fn copy_rejects_mismatched_pairs() {
        let table = test_table(1, 1);
        let schema = table.schema();
        let bad = [(
            schema.column(ColumnRole::Timestamp),
            schema.column(ColumnRole::DataShadow),
        )];
        assert!(matches!(
            table.copy_columns(&bad),
            Err(TableError::InvalidCopyPair { .. })
        ));
    }
}
