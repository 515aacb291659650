//! Column schema builder.
//!
//! Every table kind gets the same four columns, allocated in a fixed
//! order: `timestamp`, `timestamp_shadow`, `data`, `data_shadow`. The
//! builder verifies that the allocator hands back exactly the id it asked
//! for; any divergence is schema drift and is never recoverable.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ami_core::TableKind;

use crate::error::{TableError, TableResult};

/// Size of one cell in bytes.
pub const CELL_SIZE: usize = std::mem::size_of::<i32>();

/// Column identifier, unique across all table kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Timestamp,
    TimestampShadow,
    Data,
    DataShadow,
}

impl ColumnRole {
    /// Allocation order.
    pub const ORDER: [ColumnRole; 4] = [
        ColumnRole::Timestamp,
        ColumnRole::TimestampShadow,
        ColumnRole::Data,
        ColumnRole::DataShadow,
    ];

    pub fn is_shadow(self) -> bool {
        matches!(self, ColumnRole::TimestampShadow | ColumnRole::DataShadow)
    }

    /// Position of this role within a table's four columns.
    pub fn offset(self) -> u32 {
        match self {
            ColumnRole::Timestamp => 0,
            ColumnRole::TimestampShadow => 1,
            ColumnRole::Data => 2,
            ColumnRole::DataShadow => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnRole::Timestamp => "timestamp",
            ColumnRole::TimestampShadow => "timestamp_shadow",
            ColumnRole::Data => "data",
            ColumnRole::DataShadow => "data_shadow",
        }
    }

    /// The id this role is expected to receive in a table of `kind`.
    pub fn column_id(self, kind: TableKind) -> ColumnId {
        ColumnId(kind.column_base() + self.offset())
    }
}

/// A column allocated in a column space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub size: usize,
}

/// The set of columns allocated for one table.
#[derive(Debug, Clone)]
pub struct ColumnSpace {
    name: String,
    columns: Vec<ColumnDef>,
}

impl ColumnSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    pub fn allocator(&mut self) -> ColumnAllocator<'_> {
        ColumnAllocator { space: self }
    }
}

/// Allocates columns in a [`ColumnSpace`].
///
/// A requested id is honoured when it is free; otherwise the next id above
/// every allocated column is returned.
pub struct ColumnAllocator<'a> {
    space: &'a mut ColumnSpace,
}

impl ColumnAllocator<'_> {
    pub fn allocate(&mut self, size: usize, requested: ColumnId) -> ColumnId {
        let id = if self.space.contains(requested) {
            let next = self.space.columns.iter().map(|c| c.id.0).max().unwrap_or(0) + 1;
            ColumnId(next)
        } else {
            requested
        };
        self.space.columns.push(ColumnDef { id, size });
        id
    }
}

/// Persistent and shadow column ids for one table, index-paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub kind: TableKind,
    pub persistent: Vec<ColumnId>,
    pub shadow: Vec<ColumnId>,
}

impl ColumnSchema {
    /// `(persistent, shadow)` pairs in allocation order.
    pub fn pairs(&self) -> Vec<(ColumnId, ColumnId)> {
        self.persistent
            .iter()
            .copied()
            .zip(self.shadow.iter().copied())
            .collect()
    }

    pub fn column(&self, role: ColumnRole) -> ColumnId {
        role.column_id(self.kind)
    }

    pub fn role_of(&self, id: ColumnId) -> Option<ColumnRole> {
        ColumnRole::ORDER
            .into_iter()
            .find(|role| role.column_id(self.kind) == id)
    }

    /// Build the four-column schema for `kind` into `space`.
    pub fn build(kind: TableKind, space: &mut ColumnSpace) -> TableResult<Self> {
        let mut persistent = Vec::with_capacity(2);
        let mut shadow = Vec::with_capacity(2);
        let mut allocator = space.allocator();

        for role in ColumnRole::ORDER {
            let expected = role.column_id(kind);
            let allocated = allocator.allocate(CELL_SIZE, expected);
            if allocated != expected {
                return Err(TableError::SchemaDrift {
                    table: kind.name().to_string(),
                    expected,
                    allocated,
                });
            }
            if role.is_shadow() {
                shadow.push(allocated);
            } else {
                persistent.push(allocated);
            }
        }

        debug!(table = %kind, ?persistent, ?shadow, "column schema built");
        Ok(Self {
            kind,
            persistent,
            shadow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_allocated_in_fixed_order_for_every_kind() {
        for kind in TableKind::ALL {
            let mut space = ColumnSpace::new(kind.name());
            let schema = ColumnSchema::build(kind, &mut space).unwrap();

            let ids: Vec<ColumnId> = space.columns().iter().map(|c| c.id).collect();
            let base = kind.column_base();
            assert_eq!(
                ids,
                vec![
                    ColumnId(base),
                    ColumnId(base + 1),
                    ColumnId(base + 2),
                    ColumnId(base + 3)
                ]
            );
            assert_eq!(schema.persistent.len(), schema.shadow.len());
            assert_eq!(schema.persistent, vec![ColumnId(base), ColumnId(base + 2)]);
            assert_eq!(schema.shadow, vec![ColumnId(base + 1), ColumnId(base + 3)]);
        }
    }

    #[test]
    fn pairs_match_roles() {
        let mut space = ColumnSpace::new("result");
        let schema = ColumnSchema::build(TableKind::Result, &mut space).unwrap();
        for (persistent, shadow) in schema.pairs() {
            let p = schema.role_of(persistent).unwrap();
            let s = schema.role_of(shadow).unwrap();
            assert!(!p.is_shadow());
            assert!(s.is_shadow());
            assert_eq!(p.offset() + 1, s.offset());
        }
    }

    #[test]
    fn every_column_is_cell_sized() {
        let mut space = ColumnSpace::new("control");
        ColumnSchema::build(TableKind::Control, &mut space).unwrap();
        assert!(space.columns().iter().all(|c| c.size == CELL_SIZE));
    }

    #[test]
    fn occupied_id_is_schema_drift() {
        let mut space = ColumnSpace::new("telemetry");
        space.allocator().allocate(CELL_SIZE, ColumnId(1));

        let err = ColumnSchema::build(TableKind::Telemetry, &mut space).unwrap_err();
        match err {
            TableError::SchemaDrift {
                expected,
                allocated,
                ..
            } => {
                assert_eq!(expected, ColumnId(1));
                assert_eq!(allocated, ColumnId(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
