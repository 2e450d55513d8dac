use chrono::{Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::error::Error;

use crate::directive::Directive;

/// Header row of every export, in column order
pub const HEADERS: [&str; 6] = ["지시번호", "지시사항", "담당부서", "진척도(%)", "상태", "등록일"];

/// Name of the single worksheet
pub const SHEET_NAME: &str = "이행현황";

/// Label used in the default export file name
pub const DEFAULT_LABEL: &str = "현황";

/// Placeholder for a missing serial number or status
pub const PLACEHOLDER: &str = "-";

/// One directive flattened into the six export columns
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportRow {
    pub serial_no: String,
    pub task: String,
    pub dept: String,
    pub progress: Option<i64>,
    pub status: String,
    pub registered: String,
}

/// Flatten directives into export rows, dates in the local time zone
pub fn export_rows(records: &[Directive]) -> Vec<ExportRow> {
    export_rows_in(records, &Local)
}

/// Flatten directives into export rows, dates in the given time zone
///
/// Dates are written the way the Korean locale prints them, e.g. `2024. 1. 5.`
pub fn export_rows_in<Tz: TimeZone>(records: &[Directive], zone: &Tz) -> Vec<ExportRow>
where
    Tz::Offset: std::fmt::Display,
{
    records
        .iter()
        .map(|record| ExportRow {
            serial_no: record
                .serial_no
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            task: record.task.clone(),
            dept: record.dept.clone(),
            progress: record.progress,
            status: record
                .status
                .map(|s| s.label().to_string())
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            registered: record
                .created_at
                .with_timezone(zone)
                .format("%Y. %-m. %-d.")
                .to_string(),
        })
        .collect()
}

/// File name for a workbook exported on `today`
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use ed_dash::downloader::export_file_name;
///
/// let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(export_file_name("현황", today), "ed-dash_현황_2024-03-09.xlsx");
/// ```
pub fn export_file_name(label: &str, today: NaiveDate) -> String {
    format!("ed-dash_{}_{}.xlsx", label, today.format("%Y-%m-%d"))
}

/// Same as [`export_file_name`] with a `.csv` extension
pub fn csv_file_name(label: &str, today: NaiveDate) -> String {
    format!("ed-dash_{}_{}.csv", label, today.format("%Y-%m-%d"))
}

/// Convert export rows to CSV format
///
/// The first line is the fixed header row. Fields containing commas, quotes
/// or line breaks are quoted with doubled inner quotes.
pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut csv_content = String::new();
    push_csv_line(&mut csv_content, HEADERS.iter().copied());

    for row in rows {
        let progress = row.progress.map(|p| p.to_string()).unwrap_or_default();
        push_csv_line(
            &mut csv_content,
            [
                row.serial_no.as_str(),
                row.task.as_str(),
                row.dept.as_str(),
                progress.as_str(),
                row.status.as_str(),
                row.registered.as_str(),
            ]
            .into_iter(),
        );
    }

    csv_content
}

fn push_csv_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, value) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains([',', '"', '\n', '\r']) {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert export rows to XLSX format
///
/// Writes one worksheet named [`SHEET_NAME`] with the bold header row
/// followed by one row per directive. Progress is stored as a number.
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error + Send + Sync>>` - XLSX file content as bytes or an error
pub fn to_xlsx(rows: &[ExportRow]) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;

    let header_format = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, row.serial_no.as_str())?;
        worksheet.write_string(r, 1, row.task.as_str())?;
        worksheet.write_string(r, 2, row.dept.as_str())?;
        if let Some(progress) = row.progress {
            worksheet.write_number(r, 3, progress as f64)?;
        }
        worksheet.write_string(r, 4, row.status.as_str())?;
        worksheet.write_string(r, 5, row.registered.as_str())?;
    }

    workbook.push_worksheet(worksheet);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
