// Library crate behind the dimensional-pipeline binary

pub mod error;
pub mod logging;
pub mod pipeline;

pub use error::{ConfigError, PipelineError};
