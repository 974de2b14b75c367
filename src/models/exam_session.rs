use crate::models::answer::AnswerValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Submitted,
    Terminated,
}

/// Client mirror of the backend's exam session. The backend owns it; only
/// `saved_answers` is ever pushed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    #[serde(alias = "session_id")]
    pub id: Uuid,
    #[serde(alias = "assessment")]
    pub assessment_id: Uuid,
    #[serde(alias = "student")]
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub server_deadline: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub saved_answers: Vec<Option<AnswerValue>>,
    #[serde(default, alias = "cheating_count")]
    pub violation_count: u32,
    #[serde(default)]
    pub time_remaining_seconds: Option<i64>,
}

impl ExamSession {
    pub fn is_closed(&self) -> bool {
        self.status != SessionStatus::InProgress
    }
}
