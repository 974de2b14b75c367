use crate::dto::session_dto::SubmissionReceipt;
use crate::models::answer::{normalize_answers, AnswerSheet};
use crate::models::question::Question;
use crate::services::capability::FullscreenControl;
use crate::services::evidence_recorder::EvidenceRecorder;
use crate::services::exam_api::ExamBackend;
use crate::services::notices::{ExamOutcome, NoticeSink, SessionNotice};
use crate::services::resume_store::ResumeStore;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitReason {
    Manual,
    Forced,
    Timeout,
}

impl SubmitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::Forced => "forced",
            SubmitReason::Timeout => "timeout",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SubmitReason::Manual => "Submitting your answers...",
            SubmitReason::Forced => {
                "Too many integrity warnings. Your exam is being submitted automatically."
            }
            SubmitReason::Timeout => "Time is up. Your answers are being submitted.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Idle,
    InFlight,
    Done,
}

/// Proof that the caller won the exactly-once latch. Dropping it without a
/// successful submission re-opens the latch so the student can retry.
pub struct SubmissionTicket {
    reason: SubmitReason,
    latch: Arc<Mutex<Latch>>,
    settled: bool,
}

impl SubmissionTicket {
    pub fn reason(&self) -> SubmitReason {
        self.reason
    }

    fn settle(mut self) {
        *lock(&self.latch) = Latch::Done;
        self.settled = true;
    }
}

impl Drop for SubmissionTicket {
    fn drop(&mut self) {
        if !self.settled {
            *lock(&self.latch) = Latch::Idle;
        }
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(SubmissionReceipt),
    /// The backend had already closed the session; local cleanup ran instead.
    Terminated,
    AlreadyInFlight,
    AlreadyFinished,
    Refused(String),
    Failed { message: String, retryable: bool },
}

/// Runs the single submission of a session: flush evidence, normalize,
/// submit, clean up.
pub struct SubmissionCoordinator {
    assessment_id: Uuid,
    session_id: Uuid,
    questions: Arc<Vec<Question>>,
    answers: Arc<AnswerSheet>,
    backend: Arc<dyn ExamBackend>,
    recorder: Arc<EvidenceRecorder>,
    resume: ResumeStore,
    fullscreen: Arc<dyn FullscreenControl>,
    notices: NoticeSink,
    latch: Arc<Mutex<Latch>>,
    answers_ready: Option<watch::Receiver<bool>>,
}

impl SubmissionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assessment_id: Uuid,
        session_id: Uuid,
        questions: Arc<Vec<Question>>,
        answers: Arc<AnswerSheet>,
        backend: Arc<dyn ExamBackend>,
        recorder: Arc<EvidenceRecorder>,
        resume: ResumeStore,
        fullscreen: Arc<dyn FullscreenControl>,
        notices: NoticeSink,
    ) -> Self {
        Self {
            assessment_id,
            session_id,
            questions,
            answers,
            backend,
            recorder,
            resume,
            fullscreen,
            notices,
            latch: Arc::new(Mutex::new(Latch::Idle)),
            answers_ready: None,
        }
    }

    /// Submissions wait until `ready` turns true (or its sender is gone)
    /// before reading the answer sheet.
    pub fn with_answers_ready(mut self, ready: watch::Receiver<bool>) -> Self {
        self.answers_ready = Some(ready);
        self
    }

    /// Claims the latch. Synchronous, so the outcome is decided before any await.
    pub fn begin(&self, reason: SubmitReason) -> Option<SubmissionTicket> {
        let mut latch = lock(&self.latch);
        match *latch {
            Latch::Idle => {
                *latch = Latch::InFlight;
                Some(SubmissionTicket {
                    reason,
                    latch: self.latch.clone(),
                    settled: false,
                })
            }
            state => {
                debug!(reason = reason.as_str(), ?state, "Submission already claimed");
                None
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        *lock(&self.latch) == Latch::InFlight
    }

    pub fn is_finished(&self) -> bool {
        *lock(&self.latch) == Latch::Done
    }

    /// `AlreadyInFlight` or `AlreadyFinished`, for callers that lost the latch.
    pub fn busy_outcome(&self) -> SubmitOutcome {
        if self.is_finished() {
            SubmitOutcome::AlreadyFinished
        } else {
            SubmitOutcome::AlreadyInFlight
        }
    }

    pub async fn submit(&self, reason: SubmitReason) -> SubmitOutcome {
        match self.begin(reason) {
            Some(ticket) => self.run(ticket).await,
            None => self.busy_outcome(),
        }
    }

    pub async fn run(&self, ticket: SubmissionTicket) -> SubmitOutcome {
        let reason = ticket.reason();
        info!(assessment_id = %self.assessment_id, reason = reason.as_str(), "Submitting exam");
        self.notices.send(SessionNotice::Submitting {
            reason,
            message: reason.message().to_string(),
        });

        let clip = self.recorder.stop_clip().await;
        debug!(?clip, "Evidence flushed before submission");

        if let Some(mut ready) = self.answers_ready.clone() {
            if ready.wait_for(|restored| *restored).await.is_err() {
                debug!("Answer restore went away before finishing");
            }
        }
        let answers = normalize_answers(&self.questions, &self.answers.snapshot());

        match self.backend.submit_work(self.assessment_id, &answers).await {
            Ok(receipt) => {
                ticket.settle();
                info!(
                    assessment_id = %self.assessment_id,
                    submission_id = %receipt.id,
                    reason = reason.as_str(),
                    "Exam submitted"
                );
                self.cleanup().await;
                self.notices.send(SessionNotice::Finished {
                    outcome: ExamOutcome::Submitted { reason },
                });
                SubmitOutcome::Submitted(receipt)
            }
            Err(e) => {
                drop(ticket);
                error!(
                    assessment_id = %self.assessment_id,
                    reason = reason.as_str(),
                    error = %e,
                    "Exam submission failed"
                );
                let message = e.student_message();
                self.notices.send(SessionNotice::SubmissionFailed {
                    reason,
                    message: message.clone(),
                });
                SubmitOutcome::Failed {
                    message,
                    retryable: e.is_retryable(),
                }
            }
        }
    }

    /// Same teardown as a submission, minus the submit call.
    pub async fn terminate(&self, ticket: SubmissionTicket) -> SubmitOutcome {
        info!(assessment_id = %self.assessment_id, "Session terminated by proctoring");
        let clip = self.recorder.stop_clip().await;
        debug!(?clip, "Evidence flushed before termination");
        ticket.settle();
        self.cleanup().await;
        self.notices.send(SessionNotice::Finished {
            outcome: ExamOutcome::Terminated,
        });
        SubmitOutcome::Terminated
    }

    async fn cleanup(&self) {
        if let Err(e) = self.resume.clear(self.assessment_id).await {
            warn!(assessment_id = %self.assessment_id, error = %e, "Failed to clear resume record");
        }
        if let Err(e) = self.backend.end_proctoring(self.session_id).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to end proctoring session");
        }
        if self.fullscreen.is_active() {
            if let Err(e) = self.fullscreen.exit().await {
                warn!(error = %e, "Failed to exit fullscreen");
            }
        }
    }
}

fn lock(latch: &Mutex<Latch>) -> MutexGuard<'_, Latch> {
    latch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::answer::{AnswerValue, NO_ANSWER};
    use crate::services::capability::{HeadlessFullscreen, HeadlessMedia};
    use crate::services::resume_store::MemoryStorage;
    use crate::services::test_support::{receipt, MockBackend};
    use chrono::Utc;
    use std::time::Duration;

    struct Harness {
        coordinator: SubmissionCoordinator,
        resume: ResumeStore,
        answers: Arc<AnswerSheet>,
        assessment_id: Uuid,
    }

    fn harness(backend: MockBackend) -> Harness {
        let assessment_id = Uuid::new_v4();
        let questions = Arc::new(vec![
            Question::multiple_choice(1, "Pick one", &["a", "b"]),
            Question::short_answer(2, "Explain"),
        ]);
        let answers = Arc::new(AnswerSheet::new(questions.len()));
        let backend: Arc<dyn ExamBackend> = Arc::new(backend);
        let (notices, _rx) = NoticeSink::channel();
        let recorder = EvidenceRecorder::new(
            Arc::new(HeadlessMedia),
            backend.clone(),
            notices.clone(),
            Duration::from_secs(30),
        );
        let resume = ResumeStore::new(Arc::new(MemoryStorage::new()));
        let coordinator = SubmissionCoordinator::new(
            assessment_id,
            Uuid::new_v4(),
            questions,
            answers.clone(),
            backend,
            recorder,
            resume.clone(),
            Arc::new(HeadlessFullscreen),
            notices,
        );
        Harness {
            coordinator,
            resume,
            answers,
            assessment_id,
        }
    }

    #[tokio::test]
    async fn second_claim_is_refused_while_in_flight() {
        let h = harness(MockBackend::new());
        let ticket = h.coordinator.begin(SubmitReason::Timeout).unwrap();
        assert!(h.coordinator.begin(SubmitReason::Manual).is_none());
        assert!(matches!(
            h.coordinator.submit(SubmitReason::Manual).await,
            SubmitOutcome::AlreadyInFlight
        ));
        drop(ticket);
        assert!(!h.coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn success_normalizes_answers_and_clears_resume_record() {
        let mut backend = MockBackend::new();
        backend
            .expect_submit_work()
            .withf(|_, answers| {
                answers.to_vec() == vec![AnswerValue::Choice(NO_ANSWER), AnswerValue::Text(String::new())]
            })
            .times(1)
            .returning(|assessment_id, _| Ok(receipt(assessment_id)));
        backend.expect_end_proctoring().times(1).returning(|_| Ok(()));
        let h = harness(backend);
        h.resume
            .begin(h.assessment_id, Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let outcome = h.coordinator.submit(SubmitReason::Forced).await;
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
        assert!(h.coordinator.is_finished());
        assert!(h.resume.load(h.assessment_id).await.unwrap().is_none());
        assert!(matches!(
            h.coordinator.submit(SubmitReason::Manual).await,
            SubmitOutcome::AlreadyFinished
        ));
    }

    #[tokio::test]
    async fn failure_releases_latch_and_keeps_resume_record() {
        let mut backend = MockBackend::new();
        let mut calls = 0;
        backend.expect_submit_work().times(2).returning(move |assessment_id, _| {
            calls += 1;
            if calls == 1 {
                Err(Error::Backend {
                    status: 502,
                    message: "bad gateway".into(),
                })
            } else {
                Ok(receipt(assessment_id))
            }
        });
        backend.expect_end_proctoring().times(1).returning(|_| Ok(()));
        let h = harness(backend);
        h.answers.set(0, Some(AnswerValue::Choice(1))).unwrap();
        h.resume
            .begin(h.assessment_id, Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        match h.coordinator.submit(SubmitReason::Manual).await {
            SubmitOutcome::Failed { retryable, .. } => assert!(retryable),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!h.coordinator.is_in_flight());
        assert!(h.resume.load(h.assessment_id).await.unwrap().is_some());

        assert!(matches!(
            h.coordinator.submit(SubmitReason::Manual).await,
            SubmitOutcome::Submitted(_)
        ));
    }

    #[tokio::test]
    async fn termination_skips_submit_call() {
        let mut backend = MockBackend::new();
        backend.expect_submit_work().never();
        backend.expect_end_proctoring().times(1).returning(|_| {
            Err(Error::Backend {
                status: 404,
                message: "Session not found".into(),
            })
        });
        let h = harness(backend);
        h.resume
            .begin(h.assessment_id, Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let ticket = h.coordinator.begin(SubmitReason::Forced).unwrap();
        assert!(matches!(h.coordinator.terminate(ticket).await, SubmitOutcome::Terminated));
        assert!(h.coordinator.is_finished());
        assert!(h.resume.load(h.assessment_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submission_waits_for_restored_answers() {
        let mut backend = MockBackend::new();
        backend
            .expect_submit_work()
            .withf(|_, answers| answers.first() == Some(&AnswerValue::Choice(1)))
            .times(1)
            .returning(|assessment_id, _| Ok(receipt(assessment_id)));
        backend.expect_end_proctoring().returning(|_| Ok(()));
        let h = harness(backend);
        let (ready_tx, ready_rx) = watch::channel(false);
        let coordinator = h.coordinator.with_answers_ready(ready_rx);

        let submit = coordinator.submit(SubmitReason::Timeout);
        tokio::pin!(submit);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut submit).await.is_err());

        h.answers.restore(vec![Some(AnswerValue::Choice(1))]);
        ready_tx.send(true).unwrap();
        assert!(matches!(submit.await, SubmitOutcome::Submitted(_)));
    }
}
