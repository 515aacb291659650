//! redb table definitions for externalized snapshots.
//!
//! Each snapshot file holds one manifest and one row of cells per
//! (shadow column, entity), keyed `{column}:{entity}`.

use redb::TableDefinition;

/// Snapshot shape keyed by the constant [`MANIFEST_KEY`].
pub const MANIFEST: TableDefinition<&str, &[u8]> = TableDefinition::new("manifest");

/// Shadow cells keyed by `{column_id}:{entity}`; values are JSON `i32` arrays.
pub const CELLS: TableDefinition<&str, &[u8]> = TableDefinition::new("cells");

pub const MANIFEST_KEY: &str = "shape";
