pub mod cadence;
pub mod config;
pub mod types;

pub use cadence::{Cadence, CadenceGate};
pub use config::{AmiConfig, ConfigError, SourceFailurePolicy};
pub use types::*;
