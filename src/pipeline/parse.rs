//! Parse functions - turn workbook sheets into typed staging rows

use crate::error::{PipelineError, Result};
use crate::pipeline::sheets::{normalize_name, StagingTable, STAGING_TABLES};
use crate::pipeline::types::{CellValue, ColumnKind, StagingRow};
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A sheet after header mapping and cell coercion
#[derive(Debug)]
pub struct ParsedSheet {
    pub table: &'static StagingTable,
    pub sheet_name: String,
    pub rows: Vec<StagingRow>,
    pub blank_rows: usize,
    /// Staging columns with no matching header; loaded as NULL
    pub missing_columns: Vec<&'static str>,
}

impl ParsedSheet {
    pub fn source_rows(&self) -> usize {
        self.rows.len() + self.blank_rows
    }
}

/// Read every expected sheet from the workbook. Sheets the workbook does not
/// carry are logged and skipped.
pub fn read_workbook(path: &Path) -> Result<Vec<ParsedSheet>> {
    info!("Reading workbook {:?}", path);

    let workbook_error = |source| PipelineError::Workbook {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
    let sheet_names = workbook.sheet_names();
    debug!("Workbook sheets: {:?}", sheet_names);

    let mut parsed = Vec::new();

    for table in STAGING_TABLES {
        let Some(sheet_name) = table.find_sheet(&sheet_names) else {
            warn!("Sheet '{}' not found in workbook, skipping {}", table.sheet, table.table);
            continue;
        };

        let range = workbook.worksheet_range(sheet_name).map_err(workbook_error)?;
        let sheet = parse_sheet(sheet_name, &range, table);

        info!(
            "Parsed sheet '{}': {} rows ({} blank)",
            sheet_name,
            sheet.rows.len(),
            sheet.blank_rows
        );
        parsed.push(sheet);
    }

    Ok(parsed)
}

/// Map the header row onto the table's columns and coerce every data row
pub fn parse_sheet(sheet_name: &str, range: &Range<Data>, table: &'static StagingTable) -> ParsedSheet {
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let mut rows_iter = range.rows();

    let headers: Vec<String> = rows_iter
        .next()
        .map(|row| row.iter().map(header_text).collect())
        .unwrap_or_default();
    let normalized: Vec<String> = headers.iter().map(|h| normalize_name(h)).collect();

    let indices: Vec<Option<usize>> = table
        .columns
        .iter()
        .map(|column| {
            let wanted = normalize_name(column.name);
            normalized.iter().position(|h| *h == wanted)
        })
        .collect();

    let missing_columns: Vec<&'static str> = table
        .columns
        .iter()
        .zip(&indices)
        .filter(|(_, idx)| idx.is_none())
        .map(|(column, _)| column.name)
        .collect();

    if !missing_columns.is_empty() {
        warn!(
            "Sheet '{}' has no column for {:?}, loading NULL",
            sheet_name, missing_columns
        );
    }

    for (idx, header) in headers.iter().enumerate() {
        if !header.is_empty() && !indices.contains(&Some(idx)) {
            debug!("Ignoring column '{}' in sheet '{}'", header, sheet_name);
        }
    }

    let mut rows = Vec::new();
    let mut blank_rows = 0;

    for (offset, row) in rows_iter.enumerate() {
        if row.iter().all(is_blank) {
            blank_rows += 1;
            continue;
        }

        let values = table
            .columns
            .iter()
            .zip(&indices)
            .map(|(column, idx)| {
                idx.and_then(|i| row.get(i))
                    .map(|cell| coerce_cell(cell, column.kind))
                    .unwrap_or(CellValue::Null)
            })
            .collect();

        rows.push(StagingRow {
            // +1 for the header, +1 for 1-based numbering
            sheet_row: first_row + offset + 2,
            values,
        });
    }

    ParsedSheet {
        table,
        sheet_name: sheet_name.to_string(),
        rows,
        blank_rows,
        missing_columns,
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Coerce one cell to the column's kind. Anything that cannot be read as
/// that kind becomes NULL.
pub fn coerce_cell(cell: &Data, kind: ColumnKind) -> CellValue {
    let value = match kind {
        ColumnKind::Int => coerce_int(cell).map(CellValue::Int),
        ColumnKind::Decimal => coerce_decimal(cell).map(CellValue::Decimal),
        ColumnKind::Date => coerce_date(cell).map(CellValue::Date),
        ColumnKind::Text => coerce_text(cell).map(CellValue::Text),
        ColumnKind::Bool => coerce_bool(cell).map(CellValue::Bool),
    };
    value.unwrap_or(CellValue::Null)
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_int(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        Data::Float(f) => float_to_i64(*f),
        Data::Bool(b) => Some(i64::from(*b)),
        Data::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
}

fn coerce_decimal(cell: &Data) -> Option<Decimal> {
    let value = match cell {
        Data::Int(i) => Some(Decimal::from(*i)),
        Data::Float(f) => Decimal::try_from(*f).ok(),
        Data::String(s) => {
            // Currency cells sometimes arrive as text like "$1,234.50"
            let clean = s.replace(['$', ','], "");
            let clean = clean.trim();
            Decimal::from_str(clean).ok().or_else(|| {
                clean
                    .parse::<f64>()
                    .ok()
                    .and_then(|f| Decimal::try_from(f).ok())
            })
        }
        _ => None,
    };
    value.map(|d| d.round_dp(2))
}

/// Date formats accepted in text cells, tried in order
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

fn coerce_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::DateTimeIso(s) | Data::String(s) => parse_date_text(s),
        _ => None,
    }
}

/// Parse a date written as text
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Convert an Excel serial day number (1900 date system) to a date.
///
/// Excel counts a nonexistent 1900-02-29 as serial 60, so serials 1 to 60
/// come out one day earlier than Excel displays them. From serial 61
/// (1900-03-01) on the two agree.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    // Serial 2958465 is 9999-12-31, the last date Excel can represent
    if !serial.is_finite() || serial < 1.0 || serial >= 2_958_466.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

fn coerce_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => match float_to_i64(*f) {
            Some(i) => i.to_string(),
            None => f.to_string(),
        },
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())?.to_string(),
        _ => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn coerce_bool(cell: &Data) -> Option<bool> {
    match cell {
        Data::Bool(b) => Some(*b),
        Data::Int(i) => match i {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        Data::Float(f) => match float_to_i64(*f) {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Data::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sheets::staging_table;
    use rust_xlsxwriter::Workbook;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(coerce_cell(&Data::Int(7), ColumnKind::Int), CellValue::Int(7));
        assert_eq!(coerce_cell(&Data::Float(10.0), ColumnKind::Int), CellValue::Int(10));
        assert_eq!(coerce_cell(&Data::String(" 42 ".into()), ColumnKind::Int), CellValue::Int(42));
        assert_eq!(coerce_cell(&Data::String("3.0".into()), ColumnKind::Int), CellValue::Int(3));
        assert_eq!(coerce_cell(&Data::Float(2.5), ColumnKind::Int), CellValue::Null);
        assert_eq!(coerce_cell(&Data::String("n/a".into()), ColumnKind::Int), CellValue::Null);
        assert_eq!(coerce_cell(&Data::Empty, ColumnKind::Int), CellValue::Null);
    }

    #[test]
    fn test_coerce_decimal_rounds_to_cents() {
        assert_eq!(
            coerce_cell(&Data::Float(18.004), ColumnKind::Decimal),
            CellValue::Decimal(Decimal::new(1800, 2))
        );
        assert_eq!(
            coerce_cell(&Data::Float(0.15), ColumnKind::Decimal),
            CellValue::Decimal(Decimal::new(15, 2))
        );
        assert_eq!(
            coerce_cell(&Data::String("$1,234.567".into()), ColumnKind::Decimal),
            CellValue::Decimal(Decimal::new(123457, 2))
        );
        assert_eq!(
            coerce_cell(&Data::Int(5), ColumnKind::Decimal),
            CellValue::Decimal(Decimal::from(5))
        );
        assert_eq!(coerce_cell(&Data::String("free".into()), ColumnKind::Decimal), CellValue::Null);
    }

    #[test]
    fn test_coerce_date() {
        // 44927 is 2023-01-01 in the 1900 date system
        assert_eq!(
            coerce_cell(&Data::Float(44927.0), ColumnKind::Date),
            CellValue::Date(date(2023, 1, 1))
        );
        assert_eq!(
            coerce_cell(&Data::Float(44927.75), ColumnKind::Date),
            CellValue::Date(date(2023, 1, 1))
        );
        assert_eq!(
            coerce_cell(&Data::String("2023-01-15".into()), ColumnKind::Date),
            CellValue::Date(date(2023, 1, 15))
        );
        assert_eq!(
            coerce_cell(&Data::String("2023-01-15 00:00:00".into()), ColumnKind::Date),
            CellValue::Date(date(2023, 1, 15))
        );
        assert_eq!(
            coerce_cell(&Data::DateTimeIso("2023-03-04T10:30:00".into()), ColumnKind::Date),
            CellValue::Date(date(2023, 3, 4))
        );
        assert_eq!(
            coerce_cell(&Data::String("25/12/2023".into()), ColumnKind::Date),
            CellValue::Date(date(2023, 12, 25))
        );
        assert_eq!(coerce_cell(&Data::String("soon".into()), ColumnKind::Date), CellValue::Null);
        assert_eq!(coerce_cell(&Data::Float(-3.0), ColumnKind::Date), CellValue::Null);
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(
            coerce_cell(&Data::String("  ALFKI ".into()), ColumnKind::Text),
            CellValue::Text("ALFKI".into())
        );
        assert_eq!(coerce_cell(&Data::String("   ".into()), ColumnKind::Text), CellValue::Null);
        assert_eq!(
            coerce_cell(&Data::Float(12209.0), ColumnKind::Text),
            CellValue::Text("12209".into())
        );
        assert_eq!(
            coerce_cell(&Data::Float(1.5), ColumnKind::Text),
            CellValue::Text("1.5".into())
        );
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_cell(&Data::Bool(true), ColumnKind::Bool), CellValue::Bool(true));
        assert_eq!(coerce_cell(&Data::Int(0), ColumnKind::Bool), CellValue::Bool(false));
        assert_eq!(coerce_cell(&Data::Float(1.0), ColumnKind::Bool), CellValue::Bool(true));
        assert_eq!(coerce_cell(&Data::String("Yes".into()), ColumnKind::Bool), CellValue::Bool(true));
        assert_eq!(coerce_cell(&Data::Int(2), ColumnKind::Bool), CellValue::Null);
    }

    #[test]
    fn test_error_cells_become_null() {
        let cell = Data::Error(calamine::CellErrorType::Div0);
        for kind in [
            ColumnKind::Int,
            ColumnKind::Decimal,
            ColumnKind::Date,
            ColumnKind::Text,
            ColumnKind::Bool,
        ] {
            assert_eq!(coerce_cell(&cell, kind), CellValue::Null);
        }
    }

    #[test]
    fn test_excel_serial_bounds() {
        // Excel shows serial 1 as 1900-01-01, see the leap-year note
        assert_eq!(excel_serial_to_date(1.0), Some(date(1899, 12, 31)));
        assert_eq!(excel_serial_to_date(61.0), Some(date(1900, 3, 1)));
        assert_eq!(excel_serial_to_date(2_958_465.0), Some(date(9999, 12, 31)));
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(f64::NAN), None);
    }

    #[test]
    fn test_read_workbook_maps_headers_and_skips_missing_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.xlsx");

        let mut workbook = Workbook::new();

        let customers = workbook.add_worksheet();
        customers.set_name("Customers").unwrap();
        customers.write_string(0, 0, "CustomerID").unwrap();
        customers.write_string(0, 1, "CompanyName").unwrap();
        customers.write_string(0, 2, "Notes").unwrap(); // not a staging column
        customers.write_string(1, 0, "ALFKI").unwrap();
        customers.write_string(1, 1, " Alfreds Futterkiste ").unwrap();
        customers.write_string(1, 2, "ignored").unwrap();
        // row 3 left blank
        customers.write_string(3, 1, "No Id Ltd").unwrap();

        let details = workbook.add_worksheet();
        details.set_name("OrderDetails").unwrap();
        for (col, header) in ["OrderID", "ProductID", "UnitPrice", "Quantity", "Discount"]
            .iter()
            .enumerate()
        {
            details.write_string(0, col as u16, *header).unwrap();
        }
        details.write_number(1, 0, 10248.0).unwrap();
        details.write_number(1, 1, 11.0).unwrap();
        details.write_number(1, 2, 14.0).unwrap();
        details.write_number(1, 3, 12.0).unwrap();
        details.write_number(1, 4, 0.0).unwrap();

        workbook.save(&path).unwrap();

        let sheets = read_workbook(&path).unwrap();
        assert_eq!(sheets.len(), 2);

        let customers = sheets
            .iter()
            .find(|s| s.table.table == "staging_customers")
            .unwrap();
        assert_eq!(customers.rows.len(), 2);
        assert_eq!(customers.blank_rows, 1);
        assert_eq!(customers.source_rows(), 3);
        assert_eq!(customers.rows[0].sheet_row, 2);
        assert_eq!(customers.rows[0].values[0], CellValue::Text("ALFKI".into()));
        assert_eq!(
            customers.rows[0].values[1],
            CellValue::Text("Alfreds Futterkiste".into())
        );
        assert!(customers.rows[0].values[2..].iter().all(CellValue::is_null));
        assert_eq!(customers.rows[1].sheet_row, 4);
        assert!(customers.rows[1].values[0].is_null());
        assert!(customers.missing_columns.contains(&"contact_name"));

        let details = sheets
            .iter()
            .find(|s| s.table.table == "staging_order_details")
            .unwrap();
        assert_eq!(details.sheet_name, "OrderDetails");
        assert_eq!(
            details.rows[0].values,
            vec![
                CellValue::Int(10248),
                CellValue::Int(11),
                CellValue::Decimal(Decimal::new(1400, 2)),
                CellValue::Int(12),
                CellValue::Decimal(Decimal::ZERO),
            ]
        );
        assert!(details.missing_columns.is_empty());
    }

    #[test]
    fn test_read_workbook_missing_file() {
        let err = read_workbook(Path::new("/nonexistent/raw.xlsx")).unwrap_err();
        assert!(matches!(err, PipelineError::Workbook { .. }));
    }

    #[test]
    fn test_parse_sheet_without_rows() {
        let table = staging_table("staging_region").unwrap();
        let range: Range<Data> = Range::empty();
        let sheet = parse_sheet("Region", &range, table);

        assert!(sheet.rows.is_empty());
        assert_eq!(sheet.source_rows(), 0);
        assert_eq!(sheet.missing_columns, vec!["region_id", "region_description"]);
    }
}
