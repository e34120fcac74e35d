use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RECALCULATE_CHANNEL: &str = "inventory.recalculate";
pub const RECALCULATED_CHANNEL: &str = "inventory.recalculated";
pub const RECALCULATION_FAILED_CHANNEL: &str = "inventory.recalculation_failed";

/// Asks the worker to replay a product's consumption from `from_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationRequested {
    pub product_id: Uuid,
    pub from_date: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationCompleted {
    pub product_id: Uuid,
    pub from_date: NaiveDate,
    pub skipped: bool,
    pub replayed_lines: usize,
    pub audit_entries: usize,
    pub warnings: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationFailed {
    pub product_id: Uuid,
    pub from_date: NaiveDate,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_minimal_payload() {
        let request: RecalculationRequested = serde_json::from_str(
            r#"{"product_id":"7c9e6679-7425-40de-944b-e07fc1f90ae7","from_date":"2024-03-01"}"#,
        )
        .expect("payload");

        assert_eq!(
            request.from_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
        );
        assert!(request.reason.is_none());
        assert!(request.requested_by.is_none());
    }

    #[test]
    fn test_request_rejects_bad_date() {
        let result: Result<RecalculationRequested, _> = serde_json::from_str(
            r#"{"product_id":"7c9e6679-7425-40de-944b-e07fc1f90ae7","from_date":"01/03/2024"}"#,
        );
        assert!(result.is_err());
    }
}
