//! ami-scheduler: fan-out stage invocation for the AMI pipeline.
//!
//! Stages are registered once by [`StageId`](ami_core::StageId). An
//! invocation spawns one task per index and returns a [`FutureMap`]
//! immediately. Passing that map to the next invocation threads row `i`'s
//! result into row `i` of the next stage:
//!
//! ```text
//! invoke(DataSource, n)          ─▶ FutureMap [r0 r1 .. rn-1]
//!                                       │  │       │
//! invoke(Worker, n, Some(map))   ─▶ FutureMap [w0 w1 .. wn-1]
//! ```
//!
//! Row `i` of a consumer waits only on row `i` of its producer. Rows are
//! otherwise independent and complete in any order.

pub mod error;
pub mod invoker;
pub mod registry;

pub use error::{SchedulerError, SchedulerResult};
pub use invoker::{FutureMap, StageInvoker};
pub use registry::{Stage, StageCall, StageRegistry};
