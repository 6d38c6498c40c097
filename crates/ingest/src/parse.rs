//! CSV decoding into [`TollFields`].
//!
//! Columns, in order: `date, time, entrance_ic, exit_ic, toll_amount,
//! car_number, etc_card_number` and an optional `device_id`. The first line
//! is a header and is skipped. Extra columns are ignored.

use chrono::NaiveDate;
use csv::StringRecord;
use rayon::prelude::*;

use etc_core::validate::validate_at;
use etc_core::TollFields;

use crate::row::{RowError, RowErrorKind};

pub const REQUIRED_FIELDS: usize = 7;

/// One data row as read from the file, before any checks.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub line: u64,
    pub raw: String,
    /// `None` when the reader could not decode the line at all.
    fields: Option<Vec<String>>,
    read_error: Option<String>,
}

/// A row that parsed and validated.
#[derive(Debug, Clone)]
pub struct ValidRow {
    pub line: u64,
    pub raw: String,
    pub fields: TollFields,
}

/// Split `data` into raw rows. Lines the reader cannot decode still produce
/// a row so they count toward the total.
pub fn read_rows(data: &[u8]) -> Vec<RawRow> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    let mut fallback_line = 1;
    for result in reader.records() {
        fallback_line += 1;
        match result {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback_line);
                fallback_line = line;
                rows.push(RawRow {
                    line,
                    raw: join_fields(&record),
                    fields: Some(record.iter().map(str::to_string).collect()),
                    read_error: None,
                });
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                fallback_line = line;
                rows.push(RawRow {
                    line,
                    raw: String::new(),
                    fields: None,
                    read_error: Some(e.to_string()),
                });
            }
        }
    }
    rows
}

fn join_fields(record: &StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}

/// Decode the typed fields of one row.
pub fn parse_row(row: &RawRow) -> Result<TollFields, RowError> {
    let fail = |kind, message: String| RowError::new(row.line, kind, message, row.raw.clone());

    let fields = match (&row.fields, &row.read_error) {
        (Some(fields), _) => fields,
        (None, err) => {
            let reason = err.clone().unwrap_or_else(|| "unreadable line".to_string());
            return Err(fail(RowErrorKind::ParseError, reason));
        }
    };
    if fields.len() < REQUIRED_FIELDS {
        return Err(fail(
            RowErrorKind::InsufficientFields,
            format!("expected at least {REQUIRED_FIELDS} fields, found {}", fields.len()),
        ));
    }

    let col = |i: usize| fields[i].trim().to_string();
    let date = NaiveDate::parse_from_str(fields[0].trim(), "%Y-%m-%d").map_err(|e| {
        fail(
            RowErrorKind::ParseError,
            format!("invalid date '{}': {e}", fields[0].trim()),
        )
    })?;
    let toll_amount = fields[4].trim().parse::<i64>().map_err(|e| {
        fail(
            RowErrorKind::ParseError,
            format!("invalid toll_amount '{}': {e}", fields[4].trim()),
        )
    })?;
    let device_id = fields
        .get(REQUIRED_FIELDS)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(TollFields {
        date,
        time: col(1),
        entrance_ic: col(2),
        exit_ic: col(3),
        toll_amount,
        car_number: col(5),
        etc_card_number: col(6),
        device_id,
    })
}

/// Parse and validate one row.
pub fn check_row(row: RawRow, today: NaiveDate) -> Result<ValidRow, RowError> {
    let fields = parse_row(&row)?;
    validate_at(&fields, today).map_err(|e| {
        RowError::new(row.line, RowErrorKind::ValidationError, e.to_string(), row.raw.clone())
    })?;
    Ok(ValidRow {
        line: row.line,
        raw: row.raw,
        fields,
    })
}

/// [`check_row`] over every row on the rayon pool. Output order matches
/// input order.
pub fn check_rows(rows: Vec<RawRow>, today: NaiveDate) -> Vec<Result<ValidRow, RowError>> {
    rows.into_par_iter().map(|row| check_row(row, today)).collect()
}
