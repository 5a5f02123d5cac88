//! Core data types for the pipeline
//! Plain data plus the small amount of behavior needed to display it

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Storage type of a staging column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Decimal,
    Date,
    Text,
    Bool,
}

/// A spreadsheet cell after coercion to its column's kind
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    Text(String),
    Bool(bool),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// One coerced spreadsheet row, in staging column order
#[derive(Debug, Clone)]
pub struct StagingRow {
    /// 1-based row number in the sheet, header included
    pub sheet_row: usize,
    pub values: Vec<CellValue>,
}

/// Per-table load statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub source_rows: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source rows: {}, inserted: {}, skipped: {}, errors: {}",
            self.source_rows, self.inserted, self.skipped, self.errors
        )
    }
}

/// Inclusive order date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// A range whose start falls after its end selects nothing
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Parse a `YYYY-MM-DD` bound
    pub fn parse_bound(value: &str) -> Result<NaiveDate, String> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map_err(|e| format!("expected YYYY-MM-DD, got '{}': {}", value, e))
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// How a batch reacts to one of its members failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and keep going
    #[default]
    BestEffort,
    /// Stop at the first failure
    FailFast,
}

/// Where the error detection step takes its date window from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorWindow {
    /// Min/max order date present in staging
    #[default]
    Staging,
    /// The range the caller passed to the fact step
    Requested,
}

/// Reason a staging order line was routed to `fact_error`, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorReason {
    MissingCustomer,
    MissingEmployee,
    MissingShipper,
    MissingProduct,
    InvalidQuantity,
    InvalidAmount,
    InvalidDiscount,
    Unknown,
}

impl ErrorReason {
    pub const ALL: [ErrorReason; 8] = [
        ErrorReason::MissingCustomer,
        ErrorReason::MissingEmployee,
        ErrorReason::MissingShipper,
        ErrorReason::MissingProduct,
        ErrorReason::InvalidQuantity,
        ErrorReason::InvalidAmount,
        ErrorReason::InvalidDiscount,
        ErrorReason::Unknown,
    ];

    /// Label stored in `fact_error.error_reason`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::MissingCustomer => "Missing Customer",
            ErrorReason::MissingEmployee => "Missing Employee",
            ErrorReason::MissingShipper => "Missing Shipper",
            ErrorReason::MissingProduct => "Missing Product",
            ErrorReason::InvalidQuantity => "Invalid Quantity",
            ErrorReason::InvalidAmount => "Invalid Amount",
            ErrorReason::InvalidDiscount => "Invalid Discount",
            ErrorReason::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorReason::ALL
            .into_iter()
            .find(|reason| reason.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown error reason '{}'", s))
    }
}

/// Error row counts per reason after the error detection step
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub counts: Vec<(ErrorReason, i64)>,
}

impl ErrorSummary {
    pub fn total(&self) -> i64 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, reason: ErrorReason) -> i64 {
        self.counts
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl std::fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.counts.is_empty() {
            return write!(f, "no error rows");
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(reason, n)| format!("{}: {}", reason, n))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A statement that failed inside a best-effort script run
#[derive(Debug, Clone)]
pub struct StatementFailure {
    /// 1-based position among the non-empty statements
    pub index: usize,
    pub message: String,
}

/// Outcome of running one SQL script
#[derive(Debug, Clone)]
pub struct ScriptReport {
    pub path: PathBuf,
    pub executed: usize,
    pub failures: Vec<StatementFailure>,
}

impl ScriptReport {
    pub fn succeeded(&self) -> usize {
        self.executed - self.failures.len()
    }
}

impl std::fmt::Display for ScriptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} of {} statements succeeded",
            self.path.display(),
            self.succeeded(),
            self.executed
        )
    }
}

/// Per-file outcome of the dimension step
#[derive(Debug, Default, Clone)]
pub struct DimensionReport {
    pub files: Vec<(PathBuf, StepStatus)>,
}

impl DimensionReport {
    pub fn failed(&self) -> usize {
        self.files.iter().filter(|(_, s)| !s.success).count()
    }
}

/// Pipeline steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Reset,
    EnsureSchema,
    CreateTables,
    LoadRawData,
    UpdateDimensions,
    IngestFact,
    IngestFactError,
    PopulateDimSor,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Reset,
        Step::EnsureSchema,
        Step::CreateTables,
        Step::LoadRawData,
        Step::UpdateDimensions,
        Step::IngestFact,
        Step::IngestFactError,
        Step::PopulateDimSor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Reset => "reset_db",
            Step::EnsureSchema => "ensure_database",
            Step::CreateTables => "create_tables",
            Step::LoadRawData => "load_raw_data",
            Step::UpdateDimensions => "update_dim_tables",
            Step::IngestFact => "ingest_fact",
            Step::IngestFactError => "ingest_fact_error",
            Step::PopulateDimSor => "populate_dim_sor",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `{success, error}` record for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepStatus {
    pub fn ok() -> Self {
        StepStatus {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        StepStatus {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for StepStatus {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => StepStatus::ok(),
            Err(e) => StepStatus::failed(e),
        }
    }
}

/// Execution status map for one run, in step order
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub execution_id: Uuid,
    pub steps: Vec<(Step, StepStatus)>,
}

impl PipelineStatus {
    pub fn new(execution_id: Uuid) -> Self {
        PipelineStatus {
            execution_id,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Step, status: StepStatus) {
        self.steps.push((step, status));
    }

    pub fn get(&self, step: Step) -> Option<&StepStatus> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, st)| st)
    }

    /// True when every step ran and none failed
    pub fn is_success(&self) -> bool {
        self.steps.len() == Step::ALL.len() && self.steps.iter().all(|(_, s)| s.success)
    }

    pub fn first_failure(&self) -> Option<(Step, &StepStatus)> {
        self.steps
            .iter()
            .find(|(_, s)| !s.success)
            .map(|(step, s)| (*step, s))
    }
}

impl Serialize for PipelineStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.steps.len() + 1))?;
        map.serialize_entry("execution_id", &self.execution_id)?;
        for (step, status) in &self.steps {
            map.serialize_entry(step.name(), status)?;
        }
        map.end()
    }
}
