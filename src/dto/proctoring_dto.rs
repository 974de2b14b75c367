use crate::models::violation::IncidentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProctoringViolationRequest {
    pub violation_type: IncidentType,
    #[validate(range(min = 1, max = 5))]
    pub severity: u8,
    #[serde(default)]
    pub details: Map<String, JsonValue>,
}

/// Form fields sent alongside the clip bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClipUploadMeta {
    pub session_id: Uuid,
    #[validate(length(min = 1))]
    pub trigger_reason: String,
    #[validate(range(min = 1))]
    pub duration: u32,
    #[validate(range(min = 1, max = 5))]
    pub severity: u8,
    pub trigger_description: String,
}

/// One violation inside a snapshot-analysis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictViolation {
    pub violation_type: IncidentType,
    pub severity: u8,
    #[serde(default)]
    pub details: Map<String, JsonValue>,
}

/// Snapshot-analysis response pushed by the proctoring capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProctoringVerdict {
    #[serde(default)]
    pub violations: Vec<VerdictViolation>,
    #[serde(default)]
    pub total_violations: u32,
    #[serde(default)]
    pub is_terminated: bool,
}

/// Server-side proctoring summary for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProctoringStatus {
    #[serde(default)]
    pub total_violations: u32,
    #[serde(default)]
    pub violation_counts: HashMap<String, u32>,
    #[serde(default)]
    pub is_terminated: bool,
    #[serde(default)]
    pub face_registered: bool,
}
