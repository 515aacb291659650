//! ami-health: robustness monitoring for AMI pipeline entities.
//!
//! A robustness monitor watches a share of the worker and graph-manager
//! entities. Each evaluation compares an entity's table write count with
//! the previous evaluation; entities that stop making progress for
//! `stale_threshold` evaluations are reported unhealthy. Verdicts are
//! recorded and logged only; nothing is restarted.

pub mod monitor;
pub mod tracker;

pub use monitor::{EvaluationGuard, MonitorState, RobustnessMonitor};
pub use tracker::{EntityTracker, HealthStatus, HealthVerdict};
