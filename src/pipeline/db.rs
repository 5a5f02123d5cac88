//! Database gateway - connections, bootstrap and reset

use crate::error::{PipelineError, Result};
use crate::pipeline::config::DbConfig;
use crate::pipeline::script::{execute_script_file, execute_statements, read_script, split_statements};
use crate::pipeline::types::FailurePolicy;
use sqlx::{Connection, PgConnection};
use std::path::Path;
use tracing::{debug, info, warn};

/// Placeholder in the bootstrap script replaced by the target database name
pub const DATABASE_PLACEHOLDER: &str = "${database}";

/// Open a connection to the target database
pub async fn connect(config: &DbConfig) -> Result<PgConnection> {
    connect_to(config, &config.database).await
}

/// Open a connection to the administrative database
pub async fn connect_admin(config: &DbConfig) -> Result<PgConnection> {
    connect_to(config, &config.admin_database).await
}

async fn connect_to(config: &DbConfig, database: &str) -> Result<PgConnection> {
    debug!("Connecting: {}", config.redacted_connection_string(database));
    let options = config.connect_options(database)?;
    let conn = PgConnection::connect_with(&options).await?;
    debug!("Connection to {} established", database);
    Ok(conn)
}

/// Close a connection, logging rather than failing if the server already went away
pub async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close connection cleanly: {}", e);
    }
}

/// Quote an identifier for direct inclusion in SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub async fn database_exists(conn: &mut PgConnection, name: &str) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Make sure the target database exists, creating it with the bootstrap
/// script if needed. Returns true when the database was created.
pub async fn ensure_database_exists(config: &DbConfig, bootstrap_script: &Path) -> Result<bool> {
    let script = read_script(bootstrap_script)?;
    let script = script.replace(DATABASE_PLACEHOLDER, &quote_identifier(&config.database));

    let mut conn = connect_admin(config).await?;
    let result = create_if_missing(&mut conn, config, bootstrap_script, &script).await;
    close(conn).await;
    result
}

async fn create_if_missing(
    conn: &mut PgConnection,
    config: &DbConfig,
    path: &Path,
    script: &str,
) -> Result<bool> {
    if database_exists(conn, &config.database).await? {
        info!("Database {} already exists", config.database);
        return Ok(false);
    }

    info!("Database {} not found, creating it", config.database);
    let statements = split_statements(script);
    execute_statements(conn, path, &statements, FailurePolicy::FailFast).await?;

    if !database_exists(conn, &config.database).await? {
        return Err(PipelineError::StatementFailed {
            path: path.to_path_buf(),
            index: statements.len(),
            message: format!("database {} still missing after bootstrap", config.database),
        });
    }

    info!("Database {} created", config.database);
    Ok(true)
}

/// Drop every pipeline table. A database that does not exist yet has nothing
/// to reset.
pub async fn reset_database(config: &DbConfig, reset_script: &Path, policy: FailurePolicy) -> Result<()> {
    let mut admin = connect_admin(config).await?;
    let exists = database_exists(&mut admin, &config.database).await;
    close(admin).await;

    if !exists? {
        info!("Database {} does not exist yet, nothing to reset", config.database);
        return Ok(());
    }

    let report = execute_script_file(config, reset_script, policy).await?;
    info!("Database {} reset ({} statements)", config.database, report.executed);
    Ok(())
}
