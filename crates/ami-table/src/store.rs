//! SnapshotStore: redb-backed external storage for shadow columns.
//!
//! One store file per table. Cells are JSON-serialized per entity into
//! redb's `&[u8]` value column, keyed `{column}:{entity}`. The manifest
//! records the table shape so a later bind can detect an incompatible
//! pre-existing file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableDatabase};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ami_core::TableKind;

use crate::error::{TableError, TableResult};
use crate::schema::ColumnId;
use crate::tables::*;

/// Convert any `Display` error into a `TableError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| TableError::$variant(e.to_string())
    };
}

/// Shape of an externalized snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub table: TableKind,
    pub entities: usize,
    pub samples_per_entity: usize,
    pub shadow_columns: Vec<ColumnId>,
}

/// A bound snapshot file.
pub struct SnapshotStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl SnapshotStore {
    /// Open in create mode: a missing file is initialized, an existing file
    /// must carry the same manifest.
    pub fn create(path: &Path, manifest: &SnapshotManifest) -> TableResult<Self> {
        let existed = path.exists();
        let db = Database::create(path).map_err(|e| {
            if existed {
                TableError::BindingConflict {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            } else {
                TableError::Store(e.to_string())
            }
        })?;
        let store = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };
        store.ensure_tables()?;

        match store.manifest()? {
            Some(existing) if existing != *manifest => {
                return Err(TableError::BindingConflict {
                    path: path.display().to_string(),
                    reason: format!(
                        "existing snapshot has {} entities x {} samples, columns {:?}",
                        existing.entities, existing.samples_per_entity, existing.shadow_columns
                    ),
                });
            }
            Some(_) => {}
            None => store.put_manifest(manifest)?,
        }

        debug!(path = ?store.path, "snapshot store bound");
        Ok(store)
    }

    /// Open an existing snapshot for reading.
    pub fn open(path: &Path) -> TableResult<Self> {
        if !path.exists() {
            return Err(TableError::NotFound(path.display().to_string()));
        }
        let db = Database::open(path).map_err(map_err!(Store))?;
        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_tables(&self) -> TableResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MANIFEST).map_err(map_err!(Store))?;
        txn.open_table(CELLS).map_err(map_err!(Store))?;
        txn.commit().map_err(map_err!(Store))?;
        Ok(())
    }

    fn put_manifest(&self, manifest: &SnapshotManifest) -> TableResult<()> {
        let value = serde_json::to_vec(manifest).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        {
            let mut table = txn.open_table(MANIFEST).map_err(map_err!(Store))?;
            table
                .insert(MANIFEST_KEY, value.as_slice())
                .map_err(map_err!(Store))?;
        }
        txn.commit().map_err(map_err!(Store))?;
        Ok(())
    }

    pub fn manifest(&self) -> TableResult<Option<SnapshotManifest>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(MANIFEST).map_err(map_err!(Store))?;
        match table.get(MANIFEST_KEY).map_err(map_err!(Store))? {
            Some(guard) => {
                let manifest: SnapshotManifest =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// Write whole shadow columns in one transaction, one row per entity.
    pub fn write_columns(
        &self,
        columns: &[(ColumnId, Vec<i32>)],
        samples_per_entity: usize,
    ) -> TableResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Store))?;
        let mut cells = 0;
        {
            let mut table = txn.open_table(CELLS).map_err(map_err!(Store))?;
            for (column, values) in columns {
                for (entity, row) in values.chunks(samples_per_entity).enumerate() {
                    let key = cell_key(*column, entity);
                    let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Store))?;
                    cells += row.len();
                }
            }
        }
        txn.commit().map_err(map_err!(Store))?;
        debug!(path = ?self.path, columns = columns.len(), cells, "shadow columns written");
        Ok(cells)
    }

    /// Cells of one entity in one column.
    pub fn read_entity(&self, column: ColumnId, entity: usize) -> TableResult<Option<Vec<i32>>> {
        let txn = self.db.begin_read().map_err(map_err!(Store))?;
        let table = txn.open_table(CELLS).map_err(map_err!(Store))?;
        let key = cell_key(column, entity);
        match table.get(key.as_str()).map_err(map_err!(Store))? {
            Some(guard) => {
                let row: Vec<i32> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Every cell of one column, in row-major order.
    pub fn read_column(&self, column: ColumnId) -> TableResult<Vec<i32>> {
        let manifest = self
            .manifest()?
            .ok_or_else(|| TableError::NotFound(format!("manifest in {}", self.path.display())))?;
        let mut values = Vec::with_capacity(manifest.entities * manifest.samples_per_entity);
        for entity in 0..manifest.entities {
            let row = self
                .read_entity(column, entity)?
                .ok_or_else(|| TableError::NotFound(cell_key(column, entity)))?;
            values.extend(row);
        }
        Ok(values)
    }
}

fn cell_key(column: ColumnId, entity: usize) -> String {
    format!("{column}:{entity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(entities: usize) -> SnapshotManifest {
        SnapshotManifest {
            table: TableKind::Telemetry,
            entities,
            samples_per_entity: 2,
            shadow_columns: vec![ColumnId(1), ColumnId(3)],
        }
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry");
        let store = SnapshotStore::create(&path, &manifest(2)).unwrap();

        let cells = store
            .write_columns(
                &[(ColumnId(1), vec![1, 2, 3, 4]), (ColumnId(3), vec![5, 6, 7, 8])],
                2,
            )
            .unwrap();
        assert_eq!(cells, 8);

        assert_eq!(store.read_entity(ColumnId(1), 1).unwrap(), Some(vec![3, 4]));
        assert_eq!(store.read_column(ColumnId(3)).unwrap(), vec![5, 6, 7, 8]);
        assert_eq!(store.manifest().unwrap(), Some(manifest(2)));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry");
        {
            let store = SnapshotStore::create(&path, &manifest(1)).unwrap();
            store.write_columns(&[(ColumnId(1), vec![9, 9])], 2).unwrap();
        }
        let store = SnapshotStore::open(&path).unwrap();
        assert_eq!(store.read_column(ColumnId(1)).unwrap(), vec![9, 9]);
    }

    #[test]
    fn rebind_with_same_shape_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry");
        drop(SnapshotStore::create(&path, &manifest(2)).unwrap());
        assert!(SnapshotStore::create(&path, &manifest(2)).is_ok());
    }

    #[test]
    fn rebind_with_other_shape_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry");
        drop(SnapshotStore::create(&path, &manifest(2)).unwrap());
        assert!(matches!(
            SnapshotStore::create(&path, &manifest(3)),
            Err(TableError::BindingConflict { .. })
        ));
    }

    #[test]
    fn foreign_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry");
        std::fs::write(&path, b"not a snapshot store at all, just bytes").unwrap();
        assert!(matches!(
            SnapshotStore::create(&path, &manifest(1)),
            Err(TableError::BindingConflict { .. })
        ));
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SnapshotStore::open(&dir.path().join("nope")),
            Err(TableError::NotFound(_))
        ));
    }
}
