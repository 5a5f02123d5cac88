//! SQL script execution - split a file on `;` and run each statement

use crate::error::{PipelineError, Result};
use crate::pipeline::config::DbConfig;
use crate::pipeline::db;
use crate::pipeline::types::{FailurePolicy, ScriptReport, StatementFailure};
use sqlx::{Executor, PgConnection};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

const PREVIEW_CHARS: usize = 50;

/// Split script text on the `;` terminator, dropping empty fragments
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read a script file, failing with `MissingScript` if it does not exist
pub fn read_script(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(PipelineError::MissingScript(path.to_path_buf()));
    }
    fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))
}

pub(crate) fn preview(statement: &str) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        format!("{}...", flat.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        flat
    }
}

/// Run statements one by one on an autocommit connection.
///
/// Under `BestEffort` a failing statement is logged and recorded and the rest
/// still run; nothing already applied is undone. Under `FailFast` the first
/// failure ends the script with `StatementFailed`.
pub async fn execute_statements(
    conn: &mut PgConnection,
    path: &Path,
    statements: &[&str],
    policy: FailurePolicy,
) -> Result<ScriptReport> {
    let mut report = ScriptReport {
        path: path.to_path_buf(),
        executed: 0,
        failures: Vec::new(),
    };

    for (i, statement) in statements.iter().enumerate() {
        let index = i + 1;
        debug!("Executing statement {}: {}", index, preview(statement));

        report.executed += 1;
        match (&mut *conn).execute(*statement).await {
            Ok(result) => {
                debug!(
                    "Statement {} executed successfully ({} rows affected)",
                    index,
                    result.rows_affected()
                );
            }
            Err(e) => {
                error!(
                    "Error executing statement {} of {:?}: {}",
                    index, path, e
                );
                if policy == FailurePolicy::FailFast {
                    return Err(PipelineError::StatementFailed {
                        path: path.to_path_buf(),
                        index,
                        message: e.to_string(),
                    });
                }
                report.failures.push(StatementFailure {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Read, split and run a script file on its own connection to the target
/// database. Fails only when the file is missing or unreadable, the
/// connection cannot be opened, or (fail-fast) a statement fails.
pub async fn execute_script_file(
    config: &DbConfig,
    path: &Path,
    policy: FailurePolicy,
) -> Result<ScriptReport> {
    let script = read_script(path)?;
    let statements = split_statements(&script);
    info!("Loaded SQL script {:?} ({} statements)", path, statements.len());

    let mut conn = db::connect(config).await?;
    let result = execute_statements(&mut conn, path, &statements, policy).await;
    db::close(conn).await;

    let report = result?;
    if report.failures.is_empty() {
        info!("{}", report);
    } else {
        error!("{} ({} failed)", report, report.failures.len());
    }

    Ok(report)
}
