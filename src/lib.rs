// Library interface for wbalrs modules
// Real-time W' balance, CP re-estimation and match detection

pub mod actor;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod outputs;
pub mod replay;
pub mod session;
pub mod shared;

// Re-export commonly used types for convenience
pub use models::*;
pub use engine::{apply_constraints, Engine, EngineSnapshot};
pub use engine::matches::MatchSummary;
pub use shared::SharedEngine;
pub use outputs::{NewEstimate, OutputChannel, SessionSummary};
pub use replay::{CsvSampleReader, SampleSource, VecSource};
pub use error::{WbalError, Result};
pub use logging::{LogConfig, LogLevel, LogFormat};
