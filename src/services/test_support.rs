use crate::dto::proctoring_dto::ProctoringStatus;
use crate::dto::session_dto::{AssessmentPaper, SavedAnswersResponse, SubmissionReceipt};
use crate::error::Result;
use crate::models::answer::AnswerValue;
use crate::models::evidence_clip::EvidenceClip;
use crate::models::exam_session::{ExamSession, SessionStatus};
use crate::models::violation::ViolationEvent;
use crate::services::exam_api::ExamBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use uuid::Uuid;

mock! {
    pub Backend {}

    #[async_trait]
    impl ExamBackend for Backend {
        async fn fetch_assessment(&self, assessment_id: Uuid) -> Result<AssessmentPaper>;
        async fn start_session(&self, assessment_id: Uuid) -> Result<ExamSession>;
        async fn report_violation(&self, session_id: Uuid, event: &ViolationEvent) -> Result<()>;
        async fn autosave_answers(&self, session_id: Uuid, answers: &[Option<AnswerValue>]) -> Result<()>;
        async fn fetch_saved_answers(&self, session_id: Uuid) -> Result<SavedAnswersResponse>;
        async fn submit_work(&self, assessment_id: Uuid, answers: &[AnswerValue]) -> Result<SubmissionReceipt>;
        async fn upload_evidence_clip(&self, clip: &EvidenceClip) -> Result<()>;
        async fn fetch_proctoring_status(&self, session_id: Uuid) -> Result<ProctoringStatus>;
        async fn end_proctoring(&self, session_id: Uuid) -> Result<()>;
    }
}

pub fn receipt(assessment_id: Uuid) -> SubmissionReceipt {
    SubmissionReceipt {
        id: Uuid::new_v4(),
        assessment: assessment_id,
        status: Some("SUBMITTED".to_string()),
        submitted_at: Some(Utc::now()),
    }
}

pub fn session(assessment_id: Uuid, deadline: DateTime<Utc>) -> ExamSession {
    ExamSession {
        id: Uuid::new_v4(),
        assessment_id,
        student_id: 7,
        started_at: Utc::now(),
        server_deadline: deadline,
        status: SessionStatus::InProgress,
        saved_answers: Vec::new(),
        violation_count: 0,
        time_remaining_seconds: None,
    }
}
