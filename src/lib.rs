#![forbid(unsafe_code)]

pub mod cli;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod process;
pub mod provider;
pub mod scorer;
pub mod storage;

pub use error::{PmError, PmResult};
pub use metrics::{MetricsConfig, TextMetricsEngine};
pub use model::{ScoreResult, SessionReport, SessionRequest};
pub use orchestrator::{ParlametricEngine, PipelineBuilder, PipelineConfig, SessionStage};
