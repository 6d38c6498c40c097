//! Row-level outcomes of an import.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a single input row was not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    /// Fewer than the seven required columns.
    InsufficientFields,
    /// A date or amount that does not parse, or an unreadable line.
    ParseError,
    ValidationError,
    /// The store refused the write.
    CreationError,
}

impl RowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFields => "insufficient_fields",
            Self::ParseError => "parse_error",
            Self::ValidationError => "validation_error",
            Self::CreationError => "creation_error",
        }
    }
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Physical line number in the input; the header is line 1.
    pub row: u64,
    pub kind: RowErrorKind,
    pub message: String,
    /// The row's fields re-joined with commas.
    pub raw: String,
}

impl RowError {
    pub fn new(
        row: u64,
        kind: RowErrorKind,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            row,
            kind,
            message: message.into(),
            raw: raw.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} ({}): {}", self.row, self.kind, self.message)
    }
}
