//! Data source variants behind one capability set.

use serde::Serialize;

use ami_core::SourceKind;

use crate::error::SourceResult;
use crate::file::FileDataSource;
use crate::frame::TelemetryFrame;
use crate::shared_memory::{SegmentRegistry, SharedMemoryDataSource};

/// Lifecycle of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    #[default]
    Unselected,
    Selected,
    Open,
    Failed,
}

#[derive(Debug)]
pub enum DataSource {
    File(FileDataSource),
    SharedMemory(SharedMemoryDataSource),
}

impl DataSource {
    pub fn file() -> Self {
        DataSource::File(FileDataSource::new())
    }

    pub fn shared_memory(registry: SegmentRegistry) -> Self {
        DataSource::SharedMemory(SharedMemoryDataSource::new(registry))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            DataSource::File(_) => SourceKind::File,
            DataSource::SharedMemory(_) => SourceKind::SharedMemory,
        }
    }

    pub fn state(&self) -> SourceState {
        match self {
            DataSource::File(s) => s.state(),
            DataSource::SharedMemory(s) => s.state(),
        }
    }

    pub fn open_count(&self) -> u32 {
        match self {
            DataSource::File(s) => s.open_count(),
            DataSource::SharedMemory(s) => s.open_count(),
        }
    }

    /// Select a locator: a path base for files, a segment name for shared memory.
    pub fn select(&mut self, locator: &str) -> SourceResult<()> {
        match self {
            DataSource::File(s) => s.select(locator),
            DataSource::SharedMemory(s) => s.select(locator),
        }
    }

    pub fn open(&mut self) -> SourceResult<()> {
        match self {
            DataSource::File(s) => s.open(),
            DataSource::SharedMemory(s) => s.open(),
        }
    }

    pub fn close(&mut self) {
        match self {
            DataSource::File(s) => s.close(),
            DataSource::SharedMemory(s) => s.close(),
        }
    }

    pub fn produce_frame(&mut self) -> SourceResult<Option<TelemetryFrame>> {
        match self {
            DataSource::File(s) => s.produce_frame(),
            DataSource::SharedMemory(s) => s.produce_frame(),
        }
    }
}
