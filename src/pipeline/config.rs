//! Configuration file loading
//!
//! The file is TOML with a required `[SQL_SERVER]` section holding the
//! connection parameters and an optional `[PIPELINE]` section for paths,
//! logging and failure policies.

use crate::error::ConfigError;
use crate::pipeline::types::{ErrorWindow, FailurePolicy};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "SQL_SERVER")]
    sql_server: Option<DbConfig>,

    #[serde(rename = "PIPELINE", default)]
    pipeline: PipelineSettings,
}

/// Database connection parameters
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    pub driver: String,
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,

    /// Database used to check for and create the target database
    #[serde(default = "default_admin_database")]
    pub admin_database: String,
}

fn default_admin_database() -> String {
    "postgres".to_string()
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("admin_database", &self.admin_database)
            .finish()
    }
}

impl DbConfig {
    /// Split `server` into host and port. Accepts `host`, `host,port` and
    /// `host:port`.
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        let server = self.server.trim();
        let invalid = || ConfigError::InvalidServer(self.server.clone());

        let (host, port) = match server.rsplit_once([',', ':']) {
            Some((host, port)) => (host.trim(), port.trim().parse::<u16>().map_err(|_| invalid())?),
            None => (server, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok((host.to_string(), port))
    }

    /// Driver-style connection string for the given database
    pub fn connection_string(&self, database: &str) -> String {
        format!(
            "Driver={};Server={};Database={};UID={};PWD={};TrustServerCertificate=yes;",
            self.driver, self.server, database, self.user, self.password
        )
    }

    /// Connection string safe to write to logs
    pub fn redacted_connection_string(&self, database: &str) -> String {
        format!(
            "Driver={};Server={};Database={};UID={};PWD=***;TrustServerCertificate=yes;",
            self.driver, self.server, database, self.user
        )
    }

    /// sqlx connect options for the given database. The server certificate is
    /// trusted without verification, encryption is used when offered.
    pub fn connect_options(&self, database: &str) -> Result<PgConnectOptions, ConfigError> {
        let (host, port) = self.host_port()?;

        Ok(PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
            .ssl_mode(PgSslMode::Prefer)
            .application_name("dimensional-pipeline"))
    }
}

/// Optional `[PIPELINE]` settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workbook: PathBuf,
    pub sql_dir: PathBuf,
    pub log_file: PathBuf,
    pub console_log: bool,
    pub log_level: String,
    pub error_window: ErrorWindow,
    pub script_policy: FailurePolicy,
    pub dimension_policy: FailurePolicy,
    pub flow_policy: FailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            workbook: PathBuf::from("raw_data_source.xlsx"),
            sql_dir: PathBuf::from("sql"),
            log_file: PathBuf::from("logs/logs_dimensional_data_pipeline.txt"),
            console_log: true,
            log_level: "info".to_string(),
            error_window: ErrorWindow::Staging,
            script_policy: FailurePolicy::BestEffort,
            dimension_policy: FailurePolicy::BestEffort,
            flow_policy: FailurePolicy::FailFast,
        }
    }
}

impl PipelineSettings {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    pub fn bootstrap_script(&self) -> PathBuf {
        self.sql_dir.join("infrastructure").join("create_database.sql")
    }

    pub fn reset_script(&self) -> PathBuf {
        self.sql_dir.join("reset_db.sql")
    }

    pub fn create_tables_script(&self) -> PathBuf {
        self.sql_dir.join("create_tables.sql")
    }

    pub fn dimension_dir(&self) -> PathBuf {
        self.sql_dir.join("dimensions")
    }

    pub fn fact_script(&self) -> PathBuf {
        self.sql_dir.join("update_fact.sql")
    }

    pub fn fact_error_script(&self) -> PathBuf {
        self.sql_dir.join("update_fact_error.sql")
    }

    pub fn dim_sor_script(&self) -> PathBuf {
        self.sql_dir.join("update_dim_sor.sql")
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db: DbConfig,
    pub settings: PipelineSettings,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let db = file
            .sql_server
            .ok_or(ConfigError::MissingSection("SQL_SERVER"))?;

        // Surface address and level problems at load time rather than mid-run
        db.host_port()?;
        file.pipeline.level_filter()?;

        Ok(PipelineConfig {
            db,
            settings: file.pipeline,
        })
    }
}
