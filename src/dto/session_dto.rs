use crate::models::answer::AnswerValue;
use crate::models::question::Question;
use crate::models::violation::IncidentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentPaper {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReportCheatingRequest {
    pub incident_type: IncidentType,
    #[serde(default)]
    #[validate(custom(function = "validate_reason_detail"))]
    pub details: Map<String, JsonValue>,
}

/// A `reason` detail, when present, must be a non-empty string.
fn validate_reason_detail(details: &Map<String, JsonValue>) -> Result<(), ValidationError> {
    match details.get("reason") {
        None => Ok(()),
        Some(JsonValue::String(reason)) if !reason.trim().is_empty() => Ok(()),
        Some(_) => Err(ValidationError::new("reason_must_be_non_empty_text")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveRequest {
    pub answers: Vec<Option<AnswerValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAnswersResponse {
    #[serde(default)]
    pub answers: Vec<Option<AnswerValue>>,
    pub time_remaining_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkRequest {
    pub assessment: Uuid,
    pub answers: Vec<AnswerValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub assessment: Uuid,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(alias = "detail", alias = "message")]
    pub error: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(details: JsonValue) -> ReportCheatingRequest {
        ReportCheatingRequest {
            incident_type: IncidentType::CopyPaste,
            details: details.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn report_reason_must_be_non_empty_text() {
        assert!(report(json!({})).validate().is_ok());
        assert!(report(json!({ "reason": "paste_into_answer", "question_index": 1 })).validate().is_ok());
        assert!(report(json!({ "reason": "" })).validate().is_err());
        assert!(report(json!({ "reason": 3 })).validate().is_err());
    }
}
