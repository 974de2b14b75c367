#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_integrity::dto::proctoring_dto::ProctoringStatus;
use exam_integrity::dto::session_dto::{AssessmentPaper, SavedAnswersResponse, SubmissionReceipt};
use exam_integrity::error::{Error, Result};
use exam_integrity::models::answer::AnswerValue;
use exam_integrity::models::evidence_clip::EvidenceClip;
use exam_integrity::models::exam_session::{ExamSession, SessionStatus};
use exam_integrity::models::question::Question;
use exam_integrity::models::violation::ViolationEvent;
use exam_integrity::services::capability::{HeadlessFullscreen, MediaCapability};
use exam_integrity::services::exam_api::ExamBackend;
use exam_integrity::services::notices::SessionNotice;
use exam_integrity::services::resume_store::{MemoryStorage, ResumeStore};
use exam_integrity::utils::time::{Clock, MonotonicClock};
use exam_integrity::ExamContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Default)]
struct Recorded {
    submissions: Vec<Vec<AnswerValue>>,
    reports: Vec<ViolationEvent>,
    uploads: Vec<EvidenceClip>,
    autosaves: usize,
    sessions_started: usize,
    failing_submits: usize,
    calls: Vec<&'static str>,
    saved_answers: Vec<Option<AnswerValue>>,
    terminated_on_server: bool,
    status_polls: usize,
    proctoring_ended: usize,
}

/// In-process backend that records every call.
pub struct FakeBackend {
    deadline: DateTime<Utc>,
    submit_delay: Duration,
    upload_delay: Duration,
    saved_answers_delay: Duration,
    recorded: Mutex<Recorded>,
}

impl FakeBackend {
    pub fn new(deadline: DateTime<Utc>) -> Self {
        Self {
            deadline,
            submit_delay: Duration::ZERO,
            upload_delay: Duration::ZERO,
            saved_answers_delay: Duration::ZERO,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Answers returned by the saved-answers endpoint, after `delay`.
    pub fn with_saved_answers(self, answers: Vec<Option<AnswerValue>>, delay: Duration) -> Self {
        self.recorded.lock().unwrap().saved_answers = answers;
        Self {
            saved_answers_delay: delay,
            ..self
        }
    }

    /// Proctoring reports the session as terminated from now on.
    pub fn terminate_on_server(&self) {
        self.recorded.lock().unwrap().terminated_on_server = true;
    }

    /// The next `count` submissions fail with a 503.
    pub fn fail_next_submits(&self, count: usize) {
        self.recorded.lock().unwrap().failing_submits = count;
    }

    pub fn submissions(&self) -> Vec<Vec<AnswerValue>> {
        self.recorded.lock().unwrap().submissions.clone()
    }

    pub fn reports(&self) -> Vec<ViolationEvent> {
        self.recorded.lock().unwrap().reports.clone()
    }

    pub fn uploads(&self) -> Vec<EvidenceClip> {
        self.recorded.lock().unwrap().uploads.clone()
    }

    pub fn autosaves(&self) -> usize {
        self.recorded.lock().unwrap().autosaves
    }

    pub fn sessions_started(&self) -> usize {
        self.recorded.lock().unwrap().sessions_started
    }

    /// Completed upload and submit calls, in the order they finished.
    pub fn calls(&self) -> Vec<&'static str> {
        self.recorded.lock().unwrap().calls.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.recorded.lock().unwrap().status_polls
    }

    pub fn proctoring_ended(&self) -> usize {
        self.recorded.lock().unwrap().proctoring_ended
    }
}

#[async_trait]
impl ExamBackend for FakeBackend {
    async fn fetch_assessment(&self, assessment_id: Uuid) -> Result<AssessmentPaper> {
        Ok(AssessmentPaper {
            id: assessment_id,
            title: "Integration test paper".into(),
            questions: questions(),
            duration_minutes: Some(60),
        })
    }

    async fn start_session(&self, assessment_id: Uuid) -> Result<ExamSession> {
        self.recorded.lock().unwrap().sessions_started += 1;
        Ok(ExamSession {
            id: Uuid::new_v4(),
            assessment_id,
            student_id: 42,
            started_at: Utc::now(),
            server_deadline: self.deadline,
            status: SessionStatus::InProgress,
            saved_answers: Vec::new(),
            violation_count: 0,
            time_remaining_seconds: None,
        })
    }

    async fn report_violation(&self, _session_id: Uuid, event: &ViolationEvent) -> Result<()> {
        self.recorded.lock().unwrap().reports.push(event.clone());
        Ok(())
    }

    async fn autosave_answers(&self, _session_id: Uuid, _answers: &[Option<AnswerValue>]) -> Result<()> {
        self.recorded.lock().unwrap().autosaves += 1;
        Ok(())
    }

    async fn fetch_saved_answers(&self, _session_id: Uuid) -> Result<SavedAnswersResponse> {
        if !self.saved_answers_delay.is_zero() {
            tokio::time::sleep(self.saved_answers_delay).await;
        }
        Ok(SavedAnswersResponse {
            answers: self.recorded.lock().unwrap().saved_answers.clone(),
            time_remaining_seconds: None,
        })
    }

    async fn submit_work(&self, assessment_id: Uuid, answers: &[AnswerValue]) -> Result<SubmissionReceipt> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        let mut recorded = self.recorded.lock().unwrap();
        recorded.submissions.push(answers.to_vec());
        recorded.calls.push("submit_work");
        if recorded.failing_submits > 0 {
            recorded.failing_submits -= 1;
            return Err(Error::Backend {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(SubmissionReceipt {
            id: Uuid::new_v4(),
            assessment: assessment_id,
            status: Some("SUBMITTED".into()),
            submitted_at: Some(Utc::now()),
        })
    }

    async fn upload_evidence_clip(&self, clip: &EvidenceClip) -> Result<()> {
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        let mut recorded = self.recorded.lock().unwrap();
        recorded.uploads.push(clip.clone());
        recorded.calls.push("upload_evidence_clip");
        Ok(())
    }

    async fn fetch_proctoring_status(&self, _session_id: Uuid) -> Result<ProctoringStatus> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.status_polls += 1;
        Ok(ProctoringStatus {
            total_violations: recorded.reports.len() as u32,
            is_terminated: recorded.terminated_on_server,
            ..ProctoringStatus::default()
        })
    }

    async fn end_proctoring(&self, _session_id: Uuid) -> Result<()> {
        self.recorded.lock().unwrap().proctoring_ended += 1;
        Ok(())
    }
}

pub fn questions() -> Vec<Question> {
    vec![
        Question::multiple_choice(1, "2 + 2 = ?", &["3", "4", "5"]),
        Question::short_answer(2, "Describe ownership in one sentence."),
    ]
}

pub struct Harness {
    pub ctx: ExamContext,
    pub backend: Arc<FakeBackend>,
    pub resume: ResumeStore,
    pub clock: Arc<MonotonicClock>,
    pub assessment_id: Uuid,
}

/// Builds a context whose server deadline sits `time_limit` from now.
pub fn harness(time_limit: chrono::Duration, media: Arc<dyn MediaCapability>) -> Harness {
    harness_with(FakeBackend::new, time_limit, media)
}

pub fn harness_with(
    build: impl FnOnce(DateTime<Utc>) -> FakeBackend,
    time_limit: chrono::Duration,
    media: Arc<dyn MediaCapability>,
) -> Harness {
    let clock = Arc::new(MonotonicClock::new());
    let backend = Arc::new(build(clock.now() + time_limit));
    let ctx = ExamContext::new(
        backend.clone(),
        Arc::new(MemoryStorage::new()),
        media,
        Arc::new(HeadlessFullscreen),
    )
    .with_clock(clock.clone());
    Harness {
        resume: ctx.resume.clone(),
        ctx,
        backend,
        clock,
        assessment_id: Uuid::new_v4(),
    }
}

/// Drains notices until the session reports it is finished.
pub async fn wait_finished(rx: &mut UnboundedReceiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut seen = Vec::new();
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("session did not finish in time")
            .expect("notice channel closed");
        let finished = matches!(notice, SessionNotice::Finished { .. });
        seen.push(notice);
        if finished {
            return seen;
        }
    }
}

pub async fn wait_for(
    rx: &mut UnboundedReceiver<SessionNotice>,
    pred: impl Fn(&SessionNotice) -> bool,
) -> SessionNotice {
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected notice never arrived")
            .expect("notice channel closed");
        if pred(&notice) {
            return notice;
        }
    }
}
