//! Write functions - persist parsed sheets into the staging tables

use crate::error::Result;
use crate::pipeline::config::DbConfig;
use crate::pipeline::db;
use crate::pipeline::parse::{read_workbook, ParsedSheet};
use crate::pipeline::sheets::StagingTable;
use crate::pipeline::types::{CellValue, ColumnKind, LoadStats, StagingRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres};
use std::path::Path;
use tracing::{debug, info, warn};

/// Load every expected sheet of the workbook into its staging table
pub async fn load_raw_data(config: &DbConfig, workbook: &Path) -> Result<Vec<(&'static str, LoadStats)>> {
    let sheets = read_workbook(workbook)?;

    let mut conn = db::connect(config).await?;
    let result = write_sheets(&mut conn, &sheets).await;
    db::close(conn).await;

    result
}

async fn write_sheets(
    conn: &mut PgConnection,
    sheets: &[ParsedSheet],
) -> Result<Vec<(&'static str, LoadStats)>> {
    let mut all_stats = Vec::with_capacity(sheets.len());

    for sheet in sheets {
        let stats = write_staging_rows(conn, sheet).await?;
        info!("Loaded {} from sheet '{}': {}", sheet.table.table, sheet.sheet_name, stats);
        all_stats.push((sheet.table.table, stats));
    }

    Ok(all_stats)
}

/// Insert one sheet's rows in a single transaction. Each row gets its own
/// savepoint so a rejected row is rolled back alone and the rest still load.
pub async fn write_staging_rows(conn: &mut PgConnection, sheet: &ParsedSheet) -> Result<LoadStats> {
    let sql = sheet.table.insert_sql();
    let mut stats = LoadStats {
        source_rows: sheet.source_rows(),
        skipped: sheet.blank_rows,
        ..LoadStats::default()
    };

    let mut tx = conn.begin().await?;

    for row in &sheet.rows {
        let mut savepoint = tx.begin().await?;

        match insert_row(&mut savepoint, &sql, sheet.table, row).await {
            Ok(()) => {
                savepoint.commit().await?;
                stats.inserted += 1;
            }
            Err(e) => {
                savepoint.rollback().await?;
                warn!(
                    "Failed to insert row {} of sheet '{}' into {}: {}",
                    row.sheet_row, sheet.sheet_name, sheet.table.table, e
                );
                stats.errors += 1;
            }
        }
    }

    tx.commit().await?;
    debug!("Committed {} rows into {}", stats.inserted, sheet.table.table);

    Ok(stats)
}

async fn insert_row(
    conn: &mut PgConnection,
    sql: &str,
    table: &StagingTable,
    row: &StagingRow,
) -> Result<(), sqlx::Error> {
    let mut query = sqlx::query(sql);
    for (column, value) in table.columns.iter().zip(&row.values) {
        query = bind_cell(query, column.kind, value);
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Bind a cell, typing NULLs after the column so the server sees the right
/// parameter type
fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    kind: ColumnKind,
    value: &'q CellValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        CellValue::Int(i) => query.bind(*i),
        CellValue::Decimal(d) => query.bind(*d),
        CellValue::Date(d) => query.bind(*d),
        CellValue::Text(s) => query.bind(s.as_str()),
        CellValue::Bool(b) => query.bind(*b),
        CellValue::Null => match kind {
            ColumnKind::Int => query.bind(None::<i64>),
            ColumnKind::Decimal => query.bind(None::<Decimal>),
            ColumnKind::Date => query.bind(None::<NaiveDate>),
            ColumnKind::Text => query.bind(None::<String>),
            ColumnKind::Bool => query.bind(None::<bool>),
        },
    }
}
