use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bulk acquisition run over several accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// 0 to 100.
    pub progress: u8,
    pub total_accounts: usize,
    pub processed_accounts: usize,
    pub succeeded_accounts: usize,
    pub failed_accounts: usize,
    pub records_imported: u64,
    pub duplicates: u64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub(crate) fn started(
        id: String,
        total_accounts: usize,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            progress: 0,
            total_accounts,
            processed_accounts: 0,
            succeeded_accounts: 0,
            failed_accounts: 0,
            records_imported: 0,
            duplicates: 0,
            from,
            to,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// `round((index + 1) / total * 100)`, for a zero-based account index.
pub fn progress_after(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = ((index + 1) as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds() {
        assert_eq!(progress_after(0, 3), 33);
        assert_eq!(progress_after(1, 3), 67);
        assert_eq!(progress_after(2, 3), 100);
        assert_eq!(progress_after(0, 1), 100);
        assert_eq!(progress_after(0, 8), 13);
    }

    #[test]
    fn status_wire_values() {
        for (status, s) in [
            (JobStatus::Processing, "processing"),
            (JobStatus::Completed, "completed"),
            (JobStatus::Failed, "failed"),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), format!("\"{s}\""));
            assert_eq!(status.is_terminal(), status != JobStatus::Processing);
        }
    }
}
