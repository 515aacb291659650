//! Snapshot/persist manager.
//!
//! A persist cycle for one table is bind → copy → unbind:
//!
//! 1. bind the table's shadow columns to a redb file named after the table,
//!    opened in create mode;
//! 2. fork every persistent column into its paired shadow column in one
//!    batched copy and externalize the shadows;
//! 3. release the binding.
//!
//! The persistent columns are only ever read, so a failed cycle leaves the
//! live data untouched and can simply be retried on the next cadence.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info};

use ami_core::TableKind;

use crate::error::{TableError, TableResult};
use crate::manager::TableSet;
use crate::schema::ColumnId;
use crate::store::{SnapshotManifest, SnapshotStore};
use crate::table::Table;

/// Outcome of one successful persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub table: TableKind,
    pub path: PathBuf,
    pub pairs: usize,
    pub cells: usize,
}

/// Shadow columns bound to an external store.
pub struct ExternalBinding {
    store: SnapshotStore,
    shadow: Vec<ColumnId>,
}

impl ExternalBinding {
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn shadow_columns(&self) -> &[ColumnId] {
        &self.shadow
    }

    /// Copy each `(persistent, shadow)` pair as one batched request and
    /// write the forked shadows to the bound store.
    pub fn copy_from(
        &self,
        table: &Table,
        pairs: &[(ColumnId, ColumnId)],
    ) -> TableResult<usize> {
        if let Some(&(src, dst)) = pairs.iter().find(|(_, dst)| !self.shadow.contains(dst)) {
            return Err(TableError::InvalidCopyPair { src, dst });
        }
        let forked = table.copy_columns(pairs)?;
        self.store
            .write_columns(&forked, table.index_space().samples())
    }
}

/// Binds tables to external snapshot files under one directory.
pub struct SnapshotManager {
    dir: PathBuf,
    bound: Mutex<HashSet<PathBuf>>,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            bound: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// External file a table is persisted to.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Bind a table's shadow columns to `<dir>/<name>` in create mode.
    pub fn bind(&self, table: &Table, name: &str) -> TableResult<ExternalBinding> {
        let path = self.path_for(name);
        {
            let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
            if !bound.insert(path.clone()) {
                return Err(TableError::BindingConflict {
                    path: path.display().to_string(),
                    reason: "already bound".to_string(),
                });
            }
        }

        let manifest = SnapshotManifest {
            table: table.kind(),
            entities: table.index_space().entities(),
            samples_per_entity: table.index_space().samples(),
            shadow_columns: table.schema().shadow.clone(),
        };
        let store = std::fs::create_dir_all(&self.dir)
            .map_err(|e| TableError::Store(e.to_string()))
            .and_then(|()| SnapshotStore::create(&path, &manifest));

        match store {
            Ok(store) => {
                debug!(table = %name, ?path, "external store bound");
                Ok(ExternalBinding {
                    store,
                    shadow: manifest.shadow_columns,
                })
            }
            Err(e) => {
                self.release(&path);
                Err(e)
            }
        }
    }

    /// Release a binding.
    pub fn unbind(&self, binding: ExternalBinding) {
        let path = binding.path().to_path_buf();
        drop(binding);
        self.release(&path);
        debug!(?path, "external store unbound");
    }

    fn release(&self, path: &Path) {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Whether a path is currently bound.
    pub fn is_bound(&self, name: &str) -> bool {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&self.path_for(name))
    }

    /// Persist explicit column lists of one table under `name`.
    pub fn persist_columns(
        &self,
        table: &Table,
        name: &str,
        persistent: &[ColumnId],
        shadow: &[ColumnId],
    ) -> TableResult<PersistReport> {
        let pairs: Vec<(ColumnId, ColumnId)> = persistent
            .iter()
            .copied()
            .zip(shadow.iter().copied())
            .collect();
        if persistent.len() != shadow.len() {
            let (src, dst) = pairs.last().copied().unwrap_or((ColumnId(0), ColumnId(0)));
            return Err(TableError::InvalidCopyPair { src, dst });
        }

        let binding = self.bind(table, name)?;
        let path = binding.path().to_path_buf();
        let copied = binding.copy_from(table, &pairs);
        self.unbind(binding);
        let cells = copied?;

        info!(table = %name, pairs = pairs.len(), cells, "table persisted");
        Ok(PersistReport {
            table: table.kind(),
            path,
            pairs: pairs.len(),
            cells,
        })
    }

    /// Persist one table with its own schema and name.
    pub fn persist(&self, table: &Table) -> TableResult<PersistReport> {
        let schema = table.schema();
        self.persist_columns(table, table.name(), &schema.persistent, &schema.shadow)
    }

    /// Persist telemetry, result, and control in that order. A failure on
    /// one table does not prevent the others.
    pub fn persist_all(&self, tables: &TableSet) -> Vec<TableResult<PersistReport>> {
        tables
            .iter()
            .map(|table| {
                let result = self.persist(table);
                if let Err(ref e) = result {
                    error!(table = %table.name(), error = %e, "persist failed, snapshot skipped");
                }
                result
            })
            .collect()
    }
}
