//! Request types for creating and changing mappings.
//!
//! Everything here is checked before a transaction is opened.

use serde::Deserialize;
use serde_json::Value;

use etc_core::{MappingStatus, RecordId, ValidationError};

pub const DEFAULT_CONFIDENCE: f64 = 1.0;
pub const DEFAULT_STATUS: MappingStatus = MappingStatus::Active;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMapping {
    pub record_id: RecordId,
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default)]
    pub mapping_type: String,
    /// Defaults to 1.0.
    pub confidence: Option<f64>,
    /// Defaults to `active`.
    pub status: Option<MappingStatus>,
    /// Must be a JSON object when given.
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_by: String,
}

impl CreateMapping {
    pub fn new(
        record_id: RecordId,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            record_id,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            mapping_type: String::new(),
            confidence: None,
            status: None,
            metadata: None,
            created_by: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("entity_id", &self.entity_id)?;
        check_not_empty("entity_type", &self.entity_type)?;
        if let Some(c) = self.confidence {
            check_confidence(c)?;
        }
        if let Some(m) = &self.metadata {
            check_metadata(m)?;
        }
        Ok(())
    }
}

/// Partial update. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMapping {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub mapping_type: Option<String>,
    pub confidence: Option<f64>,
    pub status: Option<MappingStatus>,
    pub metadata: Option<Value>,
}

impl UpdateMapping {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(v) = &self.entity_id {
            check_not_empty("entity_id", v)?;
        }
        if let Some(v) = &self.entity_type {
            check_not_empty("entity_type", v)?;
        }
        if let Some(c) = self.confidence {
            check_confidence(c)?;
        }
        if let Some(m) = &self.metadata {
            check_metadata(m)?;
        }
        Ok(())
    }
}

fn check_not_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}

fn check_confidence(confidence: f64) -> Result<(), ValidationError> {
    // NaN fails the range check too.
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::new(
            "confidence",
            format!("{confidence} is outside [0, 1]"),
        ));
    }
    Ok(())
}

fn check_metadata(metadata: &Value) -> Result<(), ValidationError> {
    if !metadata.is_object() {
        return Err(ValidationError::new("metadata", "must be a JSON object"));
    }
    Ok(())
}
