//! Orchestrator - runs the pipeline steps in order and builds the status map

use crate::error::Result;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::types::{DateRange, FailurePolicy, PipelineStatus, Step, StepStatus};
use crate::pipeline::{db, update, write};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Something that can carry out each pipeline step
#[async_trait]
pub trait PipelineTasks {
    async fn run_step(&self, step: Step) -> Result<()>;
}

/// Steps backed by the warehouse database
#[derive(Debug, Clone)]
pub struct WarehouseTasks {
    config: PipelineConfig,
    workbook: PathBuf,
    range: Option<DateRange>,
}

impl WarehouseTasks {
    pub fn new(config: PipelineConfig, range: Option<DateRange>) -> Self {
        let workbook = config.settings.workbook.clone();
        WarehouseTasks {
            config,
            workbook,
            range,
        }
    }

    /// Load from a different workbook than the configured one
    pub fn with_workbook(mut self, workbook: PathBuf) -> Self {
        self.workbook = workbook;
        self
    }
}

#[async_trait]
impl PipelineTasks for WarehouseTasks {
    async fn run_step(&self, step: Step) -> Result<()> {
        let db = &self.config.db;
        let settings = &self.config.settings;

        match step {
            Step::Reset => {
                db::reset_database(db, &settings.reset_script(), settings.script_policy).await
            }
            Step::EnsureSchema => {
                db::ensure_database_exists(db, &settings.bootstrap_script()).await?;
                Ok(())
            }
            Step::CreateTables => {
                crate::pipeline::script::execute_script_file(
                    db,
                    &settings.create_tables_script(),
                    settings.script_policy,
                )
                .await?;
                Ok(())
            }
            Step::LoadRawData => {
                let stats = write::load_raw_data(db, &self.workbook).await?;
                let errors: usize = stats.iter().map(|(_, s)| s.errors).sum();
                if errors > 0 {
                    warn!("{} staging rows were rejected, see the row errors above", errors);
                }
                Ok(())
            }
            Step::UpdateDimensions => {
                update::update_dimensions(
                    db,
                    &settings.dimension_dir(),
                    settings.dimension_policy,
                    settings.script_policy,
                )
                .await?;
                Ok(())
            }
            Step::IngestFact => {
                update::ingest_fact(db, &settings.fact_script(), self.range).await?;
                Ok(())
            }
            Step::IngestFactError => {
                update::ingest_fact_error(
                    db,
                    &settings.fact_error_script(),
                    settings.error_window,
                    self.range,
                )
                .await?;
                Ok(())
            }
            Step::PopulateDimSor => {
                update::populate_dim_sor(db, &settings.dim_sor_script(), settings.script_policy)
                    .await?;
                Ok(())
            }
        }
    }
}

/// One pipeline run, identified by its execution id
#[derive(Debug)]
pub struct DimensionalDataFlow {
    execution_id: Uuid,
    policy: FailurePolicy,
}

impl DimensionalDataFlow {
    pub fn new(policy: FailurePolicy) -> Self {
        DimensionalDataFlow {
            execution_id: Uuid::new_v4(),
            policy,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Run every step in order. Under `FailFast` the first failing step ends
    /// the run and the partial status map is returned; nothing already done
    /// is rolled back.
    pub async fn exec<T: PipelineTasks + Sync>(&self, tasks: &T) -> PipelineStatus {
        let span = info_span!("pipeline", execution_id = %self.execution_id);
        self.run(tasks).instrument(span).await
    }

    async fn run<T: PipelineTasks + Sync>(&self, tasks: &T) -> PipelineStatus {
        info!("Starting dimensional data flow execution {}", self.execution_id);
        let mut status = PipelineStatus::new(self.execution_id);

        for (i, step) in Step::ALL.into_iter().enumerate() {
            info!("Step {}/{}: {}", i + 1, Step::ALL.len(), step);

            let step_status = StepStatus::from(tasks.run_step(step).await);
            let failed = !step_status.success;

            match &step_status.error {
                None => info!("✓ {} completed", step),
                Some(e) => error!("✗ {} failed: {}", step, e),
            }
            status.record(step, step_status);

            if failed && self.policy == FailurePolicy::FailFast {
                error!("Execution {} halted at {}", self.execution_id, step);
                return status;
            }
        }

        if status.is_success() {
            info!("Execution {} completed successfully", self.execution_id);
        } else {
            warn!("Execution {} finished with failed steps", self.execution_id);
        }
        status
    }
}
