//! amid: the AMI telemetry pipeline daemon.
//!
//! Assembles the pipeline from the workspace crates:
//! - tables and snapshots (`ami-table`)
//! - data sources (`ami-source`)
//! - fan-out stage invocation (`ami-scheduler`)
//! - robustness monitoring (`ami-health`)
//!
//! [`PipelineContext::bootstrap`] builds everything once;
//! [`Orchestrator`] drives the cycle loop.

pub mod context;
pub mod orchestrator;
pub mod stages;

pub use context::PipelineContext;
pub use orchestrator::{CycleReport, Orchestrator};
pub use stages::StageValue;
