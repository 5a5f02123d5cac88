//! Error taxonomy for the pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the configuration file. Always fatal, raised before any
/// database work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("'{0}' section not found in the configuration file")]
    MissingSection(&'static str),

    #[error("invalid server address '{0}', expected host, host,port or host:port")]
    InvalidServer(String),

    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("SQL script not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to read workbook {}: {source}", path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("statement {index} of {} failed: {message}", path.display())]
    StatementFailed {
        path: PathBuf,
        index: usize,
        message: String,
    },

    #[error("{} must contain exactly one statement, found {found}", path.display())]
    ScriptShape { path: PathBuf, found: usize },

    #[error("{failed} of {total} dimension scripts failed")]
    DimensionScripts { failed: usize, total: usize },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
