//! ami-source: telemetry data sources.
//!
//! A data source produces one [`TelemetryFrame`] per invocation. Two
//! transports exist: a file-backed source reading `<base>_file.dat`, and a
//! shared-memory source attached to a named in-process segment. Both follow
//! the same explicit state machine:
//!
//! ```text
//! Unselected ──select──▶ Selected ──open──▶ Open
//!                           ▲   └──open fails──▶ Failed
//!                           └────────close──────────┘
//! ```
//!
//! "Not selected", "open but no data yet" and "open failed" are always
//! reported distinctly.

pub mod error;
pub mod file;
pub mod frame;
pub mod shared_memory;
pub mod source;

pub use error::{SourceError, SourceResult};
pub use file::FileDataSource;
pub use frame::{RECORD_LEN, TelemetryFrame};
pub use shared_memory::{SegmentRegistry, SharedMemoryDataSource, SharedMemorySegment};
pub use source::{DataSource, SourceState};
