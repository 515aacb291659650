//! Stage registry: stage id → handler.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use ami_core::StageId;

use crate::error::{SchedulerError, SchedulerResult};

/// Per-row invocation context handed to a stage handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCall {
    pub stage: StageId,
    /// Index within the launch range.
    pub index: u32,
    /// Orchestration cycle that issued the fan-out.
    pub cycle: u64,
}

/// A stage handler. `input` is this row's upstream result, if the stage
/// was launched with one.
pub trait Stage<V>: Send + Sync {
    fn run(&self, call: &StageCall, input: Option<V>) -> anyhow::Result<V>;
}

impl<V, F> Stage<V> for F
where
    F: Fn(&StageCall, Option<V>) -> anyhow::Result<V> + Send + Sync,
{
    fn run(&self, call: &StageCall, input: Option<V>) -> anyhow::Result<V> {
        self(call, input)
    }
}

/// Handlers by stage id. Each id is registered exactly once.
pub struct StageRegistry<V> {
    handlers: HashMap<StageId, Arc<dyn Stage<V>>>,
}

impl<V: 'static> StageRegistry<V> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        stage: StageId,
        handler: impl Stage<V> + 'static,
    ) -> SchedulerResult<()> {
        self.register_arc(stage, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        stage: StageId,
        handler: Arc<dyn Stage<V>>,
    ) -> SchedulerResult<()> {
        if self.handlers.contains_key(&stage) {
            return Err(SchedulerError::AlreadyRegistered(stage));
        }
        self.handlers.insert(stage, handler);
        debug!(%stage, "stage registered");
        Ok(())
    }

    pub fn get(&self, stage: StageId) -> Option<Arc<dyn Stage<V>>> {
        self.handlers.get(&stage).cloned()
    }

    pub fn is_registered(&self, stage: StageId) -> bool {
        self.handlers.contains_key(&stage)
    }

    pub fn registered(&self) -> Vec<StageId> {
        self.handlers.keys().copied().collect()
    }
}

impl<V: 'static> Default for StageRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
