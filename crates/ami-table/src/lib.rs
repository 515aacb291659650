//! ami-table: partitioned telemetry/result/control tables for AMI.
//!
//! Every table is a 2-D row index space (entity slot × sample slot) with
//! four fixed-size columns: two persistent columns written by pipeline
//! stages and two shadow columns written only by the snapshot path.
//!
//! # Architecture
//!
//! ```text
//! TableManager
//!   ├── RowIndexSpace   (entities × samples_per_entity)
//!   ├── ColumnSpace     (schema builder, fixed allocation order)
//!   └── Table           (columns + EntityPartition)
//!
//! SnapshotManager
//!   ├── bind    → ExternalBinding (redb file named after the table)
//!   ├── copy    → persistent columns forked into shadow columns
//!   └── unbind  → store released
//! ```
//!
//! Shadow columns are a point-in-time fork: the copy takes shared locks on
//! the persistent columns and exclusive locks on the shadows, so writers are
//! never blocked for longer than one batched copy and never observe the
//! shadow.

pub mod error;
pub mod manager;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod tables;

pub use error::{TableError, TableResult};
pub use manager::{TableManager, TableSet};
pub use schema::{CELL_SIZE, ColumnAllocator, ColumnId, ColumnRole, ColumnSchema, ColumnSpace};
pub use snapshot::{ExternalBinding, PersistReport, SnapshotManager};
pub use store::{SnapshotManifest, SnapshotStore};
pub use table::{EntityPartition, RowIndexSpace, Table};
