//! Field validation for toll records.
//!
//! [`validate`] stops at the first failing rule; [`validate_all`] and
//! [`validate_batch`] keep going so batch callers can report everything.

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;

use crate::error::ValidationError;
use crate::record::TollFields;

pub const MAX_GATE_NAME_CHARS: usize = 100;
pub const MAX_TOLL_AMOUNT: i64 = 999_999;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{2}):([0-9]{2}):([0-9]{2})$").expect("time regex"));

static DEVICE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{5,50}$").expect("device id regex"));

/// Recognized Japanese registration plate layouts.
///
/// - standard: `品川 300 あ 12-34` (spaces and hyphen optional)
/// - dotted serial: `品川 300 あ ・・12`
static PLATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    const REGION: &str = r"[\p{Han}\p{Hiragana}\p{Katakana}ー]{1,5}";
    const KANA: &str = r"[\p{Hiragana}A-Z]";
    [
        format!(r"^{REGION}\s?[0-9]{{2,3}}\s?{KANA}\s?[0-9]{{1,2}}-?[0-9]{{2}}$"),
        format!(r"^{REGION}\s?[0-9]{{2,3}}\s?{KANA}\s?[・.]{{1,3}}\s?[0-9]{{1,3}}$"),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("plate regex"))
    .collect()
});

/// Validate against today's local date.
pub fn validate(fields: &TollFields) -> Result<(), ValidationError> {
    validate_at(fields, Local::now().date_naive())
}

/// Validate with an explicit "today" for the future-date rule.
pub fn validate_at(fields: &TollFields, today: NaiveDate) -> Result<(), ValidationError> {
    check_date(fields.date, today)?;
    check_time(&fields.time)?;
    check_gate("entrance_ic", &fields.entrance_ic)?;
    check_gate("exit_ic", &fields.exit_ic)?;
    check_amount(fields.toll_amount)?;
    check_plate(&fields.car_number)?;
    check_card_number(&fields.etc_card_number)?;
    if let Some(device_id) = &fields.device_id {
        check_device_id(device_id)?;
    }
    Ok(())
}

/// Run every rule and collect all failures.
pub fn validate_all(fields: &TollFields, today: NaiveDate) -> Vec<ValidationError> {
    let checks = [
        check_date(fields.date, today),
        check_time(&fields.time),
        check_gate("entrance_ic", &fields.entrance_ic),
        check_gate("exit_ic", &fields.exit_ic),
        check_amount(fields.toll_amount),
        check_plate(&fields.car_number),
        check_card_number(&fields.etc_card_number),
        fields.device_id.as_deref().map_or(Ok(()), check_device_id),
    ];
    checks.into_iter().filter_map(Result::err).collect()
}

/// First failure per record, tagged with the record's index.
pub fn validate_batch(records: &[TollFields], today: NaiveDate) -> Vec<(usize, ValidationError)> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| validate_at(r, today).err().map(|e| (i, e)))
        .collect()
}

fn check_date(date: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    if date > today {
        return Err(ValidationError::new(
            "date",
            format!("{} is in the future", date.format("%Y-%m-%d")),
        ));
    }
    Ok(())
}

fn check_time(time: &str) -> Result<(), ValidationError> {
    let caps = TIME_RE
        .captures(time)
        .ok_or_else(|| ValidationError::new("time", format!("'{time}' is not HH:MM:SS")))?;

    let part = |i: usize| caps[i].parse::<u32>().unwrap_or(u32::MAX);
    let (h, m, s) = (part(1), part(2), part(3));
    if h > 23 || m > 59 || s > 59 {
        return Err(ValidationError::new("time", format!("'{time}' is out of range")));
    }
    Ok(())
}

fn check_gate(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if name.chars().count() > MAX_GATE_NAME_CHARS {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_GATE_NAME_CHARS} characters"),
        ));
    }
    Ok(())
}

fn check_amount(amount: i64) -> Result<(), ValidationError> {
    if !(0..=MAX_TOLL_AMOUNT).contains(&amount) {
        return Err(ValidationError::new(
            "toll_amount",
            format!("{amount} is outside 0..={MAX_TOLL_AMOUNT}"),
        ));
    }
    Ok(())
}

fn check_plate(plate: &str) -> Result<(), ValidationError> {
    let plate = plate.trim();
    if PLATE_PATTERNS.iter().any(|re| re.is_match(plate)) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "car_number",
            format!("'{plate}' does not match a recognized plate format"),
        ))
    }
}

/// Card number with spaces and hyphens removed.
pub fn normalize_card_number(card: &str) -> String {
    card.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}

fn check_card_number(card: &str) -> Result<(), ValidationError> {
    let digits = normalize_card_number(card);
    let ok = (16..=19).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit());
    if !ok {
        return Err(ValidationError::new(
            "etc_card_number",
            "must be 16 to 19 digits (spaces and hyphens allowed)",
        ));
    }
    Ok(())
}

fn check_device_id(device_id: &str) -> Result<(), ValidationError> {
    if !DEVICE_ID_RE.is_match(device_id) {
        return Err(ValidationError::new(
            "device_id",
            "must be 5 to 50 characters of letters, digits, '-' or '_'",
        ));
    }
    Ok(())
}
