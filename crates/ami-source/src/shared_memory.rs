//! Shared-memory data source.
//!
//! Frames are exchanged through named segments held in a
//! [`SegmentRegistry`]. Producers push frames into a segment; the source
//! attaches to it by name and pops one frame per invocation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::frame::TelemetryFrame;
use crate::source::SourceState;

/// A named frame queue shared between producers and a source.
#[derive(Debug, Clone, Default)]
pub struct SharedMemorySegment {
    frames: Arc<Mutex<VecDeque<TelemetryFrame>>>,
}

impl SharedMemorySegment {
    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, frame: TelemetryFrame) {
        self.lock().push_back(frame);
    }

    pub fn pop(&self) -> Option<TelemetryFrame> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Segments by name. One registry per pipeline.
#[derive(Debug, Clone, Default)]
pub struct SegmentRegistry {
    segments: Arc<Mutex<HashMap<String, SharedMemorySegment>>>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a segment by name, creating it if absent.
    pub fn segment(&self, name: &str) -> SharedMemorySegment {
        self.segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[derive(Debug)]
pub struct SharedMemoryDataSource {
    registry: SegmentRegistry,
    state: SourceState,
    name: Option<String>,
    segment: Option<SharedMemorySegment>,
    opens: u32,
}

impl SharedMemoryDataSource {
    pub fn new(registry: SegmentRegistry) -> Self {
        Self {
            registry,
            state: SourceState::Unselected,
            name: None,
            segment: None,
            opens: 0,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn segment_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn open_count(&self) -> u32 {
        self.opens
    }

    pub fn select(&mut self, name: &str) -> SourceResult<()> {
        if matches!(self.state, SourceState::Open | SourceState::Failed) {
            return Err(SourceError::AlreadyOpen(self.name.clone().unwrap_or_default()));
        }
        self.name = Some(name.to_string());
        self.state = SourceState::Selected;
        debug!(segment = %name, "shared memory data source selected");
        Ok(())
    }

    /// Attach to the selected segment.
    pub fn open(&mut self) -> SourceResult<()> {
        match self.state {
            SourceState::Unselected => Err(SourceError::NotSelected),
            SourceState::Open => Ok(()),
            SourceState::Failed => Err(SourceError::Failed(self.name.clone().unwrap_or_default())),
            SourceState::Selected => {
                let name = self.name.as_deref().ok_or(SourceError::NotSelected)?;
                self.segment = Some(self.registry.segment(name));
                self.state = SourceState::Open;
                self.opens += 1;
                info!(segment = %name, "shared memory data source attached");
                Ok(())
            }
        }
    }

    pub fn close(&mut self) {
        if matches!(self.state, SourceState::Open | SourceState::Failed) {
            self.segment = None;
            self.state = SourceState::Selected;
        }
    }

    pub fn has_pending_data(&self) -> SourceResult<bool> {
        self.segment
            .as_ref()
            .map(|s| !s.is_empty())
            .ok_or(SourceError::NotSelected)
    }

    pub fn produce_frame(&mut self) -> SourceResult<Option<TelemetryFrame>> {
        self.open()?;
        Ok(self.segment.as_ref().and_then(SharedMemorySegment::pop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_returns_same_segment_for_name() {
        let registry = SegmentRegistry::new();
        registry.segment("ami").push(TelemetryFrame::new(1, 1));
        assert_eq!(registry.segment("ami").len(), 1);
        assert!(registry.segment("other").is_empty());
    }

    #[test]
    fn produces_frames_in_push_order() {
        let registry = SegmentRegistry::new();
        let segment = registry.segment("ami");
        segment.push(TelemetryFrame::new(1, 10));
        segment.push(TelemetryFrame::new(2, 20));

        let mut source = SharedMemoryDataSource::new(registry);
        source.select("ami").unwrap();
        assert_eq!(source.produce_frame().unwrap(), Some(TelemetryFrame::new(1, 10)));
        assert_eq!(source.produce_frame().unwrap(), Some(TelemetryFrame::new(2, 20)));
        assert_eq!(source.produce_frame().unwrap(), None);
        assert_eq!(source.open_count(), 1);
    }

    #[test]
    fn unselected_is_not_empty() {
        let mut source = SharedMemoryDataSource::new(SegmentRegistry::new());
        assert!(matches!(source.produce_frame(), Err(SourceError::NotSelected)));
        assert!(source.has_pending_data().is_err());
    }

    #[test]
    fn reselect_requires_close() {
        let mut source = SharedMemoryDataSource::new(SegmentRegistry::new());
        source.select("a").unwrap();
        source.open().unwrap();
        assert!(matches!(source.select("b"), Err(SourceError::AlreadyOpen(_))));
        source.close();
        source.select("b").unwrap();
        assert_eq!(source.segment_name(), Some("b"));
    }
}
