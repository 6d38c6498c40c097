//! Toll transaction records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint;

pub type RecordId = Uuid;

/// The user-supplied content of a toll transaction.
///
/// The first seven fields form the record's identity for deduplication;
/// `device_id` is carried along but never hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TollFields {
    pub date: NaiveDate,
    /// Time of day as `HH:MM:SS`.
    pub time: String,
    pub entrance_ic: String,
    pub exit_ic: String,
    pub toll_amount: i64,
    pub car_number: String,
    pub etc_card_number: String,
    pub device_id: Option<String>,
}

/// A persisted toll transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtcRecord {
    pub id: RecordId,
    #[serde(flatten)]
    fields: TollFields,
    /// Link to the external row this record was acquired from.
    pub source_row_id: Option<String>,
    fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EtcRecord {
    pub fn new(fields: TollFields) -> Self {
        let now = Utc::now();
        let fingerprint = fingerprint::fingerprint(&fields);
        Self {
            id: Uuid::new_v4(),
            fields,
            source_row_id: None,
            fingerprint,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Rebuild a record from storage. The fingerprint is recomputed rather
    /// than trusted from the row.
    pub fn restore(
        id: RecordId,
        fields: TollFields,
        source_row_id: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        let fingerprint = fingerprint::fingerprint(&fields);
        Self {
            id,
            fields,
            source_row_id,
            fingerprint,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    pub fn with_source_row(mut self, source_row_id: impl Into<String>) -> Self {
        self.source_row_id = Some(source_row_id.into());
        self
    }

    pub fn fields(&self) -> &TollFields {
        &self.fields
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Replace the content fields and regenerate the fingerprint.
    pub fn set_fields(&mut self, fields: TollFields) {
        self.fingerprint = fingerprint::fingerprint(&fields);
        self.fields = fields;
        self.updated_at = Utc::now();
    }

    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
pub(crate) fn sample_fields() -> TollFields {
    TollFields {
        date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        time: "08:30:00".to_string(),
        entrance_ic: "東京IC".to_string(),
        exit_ic: "横浜町田IC".to_string(),
        toll_amount: 1320,
        car_number: "品川 300 あ 12-34".to_string(),
        etc_card_number: "1234-5678-9012-3456".to_string(),
        device_id: None,
    }
}
