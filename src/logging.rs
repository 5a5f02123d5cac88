//! Logging context for one process run
//!
//! Events go to an append-only text file, one line each, tagged with level
//! and the `pipeline{execution_id=..}` span. The console mirror is optional
//! and colors levels. The context owns the subscriber: it is installed as the
//! thread default on construction and removed when the context is dropped.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub file: Option<PathBuf>,
    pub console: bool,
    pub level: LevelFilter,
}

impl LogSettings {
    /// Console output only, for failures that happen before the
    /// configuration is available
    pub fn console_only() -> Self {
        LogSettings {
            file: None,
            console: true,
            level: LevelFilter::INFO,
        }
    }
}

pub struct LogContext {
    _guard: DefaultGuard,
}

impl LogContext {
    pub fn init(settings: &LogSettings) -> io::Result<Self> {
        let file_layer = match &settings.file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            None => None,
        };

        let console_layer = settings.console.then(|| {
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(false)
        });

        // sqlx logs every statement at INFO
        let filter = Targets::new()
            .with_default(settings.level)
            .with_target("sqlx", settings.level.min(LevelFilter::WARN));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer);

        Ok(LogContext {
            _guard: tracing::subscriber::set_default(subscriber),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, error, info, info_span};

    #[test]
    fn test_file_sink_appends_level_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("pipeline.txt");
        let settings = LogSettings {
            file: Some(path.clone()),
            console: false,
            level: LevelFilter::INFO,
        };

        {
            let _ctx = LogContext::init(&settings).unwrap();
            let span = info_span!("pipeline", execution_id = "abc-123");
            let _entered = span.enter();
            info!("first run");
            debug!("filtered out");
        }
        {
            let _ctx = LogContext::init(&settings).unwrap();
            error!("second run");
        }

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("execution_id=\"abc-123\"") || lines[0].contains("execution_id=abc-123"));
        assert!(lines[0].contains("first run"));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[1].contains("second run"));
        assert!(!text.contains('\u{1b}'), "file sink must not carry ANSI escapes");
    }

    #[test]
    fn test_sqlx_capped_at_warn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.txt");
        let settings = LogSettings {
            file: Some(path.clone()),
            console: false,
            level: LevelFilter::DEBUG,
        };

        {
            let _ctx = LogContext::init(&settings).unwrap();
            info!(target: "sqlx::query", "statement noise");
            tracing::warn!(target: "sqlx::query", "slow statement");
            debug!("step detail");
        }

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("statement noise"));
        assert!(text.contains("slow statement"));
        assert!(text.contains("step detail"));
    }
}
