use crate::dto::proctoring_dto::ProctoringVerdict;
use crate::error::{Error, Result};
use crate::models::answer::{AnswerSheet, AnswerValue};
use crate::models::question::Question;
use crate::models::violation::IncidentType;
use crate::services::capability::PageSignal;
use crate::services::escalation_controller::{EscalationController, EscalationState};
use crate::services::evidence_recorder::EvidenceRecorder;
use crate::services::notices::{NoticeSink, SessionNotice};
use crate::services::resume_store::ResumeDecision;
use crate::services::session_timer::SessionTimer;
use crate::services::submission_coordinator::{SubmissionCoordinator, SubmitOutcome};
use crate::services::violation_detector::{SignalOutcome, ViolationDetector};
use crate::ExamContext;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SAVED_ANSWERS_TIMEOUT: Duration = Duration::from_secs(5);

/// What the exam page shows after mounting.
pub enum MountView {
    Cancelled(CancelledExam),
    PreExam(PreExam),
    Running(ActiveExam),
}

pub struct ExamRuntime {
    ctx: ExamContext,
}

impl ExamRuntime {
    pub fn new(ctx: ExamContext) -> Self {
        Self { ctx }
    }

    /// Reads the resume record once and picks the screen to show.
    pub async fn mount(&self, assessment_id: Uuid, questions: Vec<Question>, notices: NoticeSink) -> Result<MountView> {
        let decision = self.ctx.resume.resolve(assessment_id, self.ctx.clock.now()).await?;
        debug!(%assessment_id, ?decision, "Exam mount");

        let view = match decision {
            ResumeDecision::Cancelled => MountView::Cancelled(CancelledExam {
                ctx: self.ctx.clone(),
                assessment_id,
                questions,
                notices,
            }),
            ResumeDecision::Fresh { consent_given } => MountView::PreExam(PreExam {
                ctx: self.ctx.clone(),
                assessment_id,
                questions,
                notices,
                consent_given,
            }),
            ResumeDecision::Resume { session_id, deadline } | ResumeDecision::Expired { session_id, deadline } => {
                // The timer starts right away; saved answers arrive in the background.
                let exam = ActiveExam::launch(
                    self.ctx.clone(),
                    assessment_id,
                    session_id,
                    deadline,
                    questions,
                    InitialAnswers::FetchSaved,
                    notices,
                )
                .await;
                MountView::Running(exam)
            }
        };
        Ok(view)
    }
}

enum InitialAnswers {
    Given(Vec<Option<AnswerValue>>),
    FetchSaved,
}

/// The blocked screen for an attempt cancelled on this device.
pub struct CancelledExam {
    ctx: ExamContext,
    assessment_id: Uuid,
    questions: Vec<Question>,
    notices: NoticeSink,
}

impl CancelledExam {
    pub fn state(&self) -> EscalationState {
        EscalationState::Cancelled
    }

    /// Lifts the cancellation (e.g. a retake approved by staff).
    pub async fn reset(self) -> Result<PreExam> {
        self.ctx.resume.reset(self.assessment_id).await?;
        Ok(PreExam {
            ctx: self.ctx,
            assessment_id: self.assessment_id,
            questions: self.questions,
            notices: self.notices,
            consent_given: false,
        })
    }
}

/// Consent and start screens.
pub struct PreExam {
    ctx: ExamContext,
    assessment_id: Uuid,
    questions: Vec<Question>,
    notices: NoticeSink,
    consent_given: bool,
}

impl PreExam {
    pub fn consent_given(&self) -> bool {
        self.consent_given
    }

    pub async fn start(&mut self, consent: bool) -> Result<ActiveExam> {
        if consent && !self.consent_given {
            if let Err(e) = self.ctx.resume.record_consent(self.assessment_id).await {
                warn!(assessment_id = %self.assessment_id, error = %e, "Failed to persist consent");
            }
            self.consent_given = true;
        }
        if !self.consent_given {
            return Err(Error::InvalidInput(
                "Consent to proctoring is required before the exam can start".to_string(),
            ));
        }

        let session = self.ctx.backend.start_session(self.assessment_id).await?;
        if session.is_closed() {
            return Err(Error::SessionClosed("This exam session has already ended".to_string()));
        }

        if let Err(e) = self
            .ctx
            .resume
            .begin(self.assessment_id, session.id, session.server_deadline)
            .await
        {
            warn!(assessment_id = %self.assessment_id, error = %e, "Failed to persist resume record");
        }

        info!(
            assessment_id = %self.assessment_id,
            session_id = %session.id,
            deadline = %session.server_deadline,
            "Exam session started"
        );
        Ok(ActiveExam::launch(
            self.ctx.clone(),
            self.assessment_id,
            session.id,
            session.server_deadline,
            self.questions.clone(),
            InitialAnswers::Given(session.saved_answers),
            self.notices.clone(),
        )
        .await)
    }
}

/// The timed exam view and everything running behind it.
pub struct ActiveExam {
    assessment_id: Uuid,
    session_id: Uuid,
    answers: Arc<AnswerSheet>,
    answers_ready: Option<watch::Receiver<bool>>,
    controller: Arc<EscalationController>,
    detector: ViolationDetector,
    timer: SessionTimer,
}

impl ActiveExam {
    async fn launch(
        ctx: ExamContext,
        assessment_id: Uuid,
        session_id: Uuid,
        deadline: DateTime<Utc>,
        questions: Vec<Question>,
        initial: InitialAnswers,
        notices: NoticeSink,
    ) -> Self {
        let answers = Arc::new(AnswerSheet::new(questions.len()));
        let restore = match initial {
            InitialAnswers::Given(saved) => {
                answers.restore(saved);
                None
            }
            InitialAnswers::FetchSaved => Some(watch::channel(false)),
        };
        let answers_ready = restore.as_ref().map(|(_, rx)| rx.clone());

        let recorder = EvidenceRecorder::new(
            ctx.media.clone(),
            ctx.backend.clone(),
            notices.clone(),
            ctx.policy.clip_max_duration,
        );
        recorder.check_capability();

        let mut coordinator = SubmissionCoordinator::new(
            assessment_id,
            session_id,
            Arc::new(questions),
            answers.clone(),
            ctx.backend.clone(),
            recorder.clone(),
            ctx.resume.clone(),
            ctx.fullscreen.clone(),
            notices.clone(),
        );
        if let Some(ready) = answers_ready.clone() {
            coordinator = coordinator.with_answers_ready(ready);
        }
        let controller = EscalationController::new(
            session_id,
            assessment_id,
            &ctx.policy,
            Arc::new(coordinator),
            recorder,
            ctx.resume.clone(),
            notices.clone(),
        );

        if let Some((ready_tx, _)) = restore {
            spawn_restore(&ctx, session_id, answers.clone(), ready_tx, controller.teardown_token().child_token());
        }

        let expiry = Arc::downgrade(&controller);
        let timer = SessionTimer::start_linked(
            deadline,
            ctx.clock.clone(),
            ctx.policy.tick_interval,
            controller.teardown_token(),
            move || {
                if let Some(controller) = expiry.upgrade() {
                    controller.on_deadline_expired();
                }
            },
        );

        spawn_autosave(
            &ctx,
            session_id,
            answers.clone(),
            Arc::downgrade(&controller),
            controller.teardown_token().child_token(),
        );
        spawn_status_poll(
            &ctx,
            session_id,
            Arc::downgrade(&controller),
            controller.teardown_token().child_token(),
        );

        if !ctx.fullscreen.is_active() {
            if let Err(e) = ctx.fullscreen.enter().await {
                warn!(error = %e, "Could not enter fullscreen");
                notices.send(SessionNotice::CapabilityUnavailable {
                    capability: "fullscreen".to_string(),
                    message: e.to_string(),
                });
            }
        }

        let detector = ViolationDetector::new(controller.clone(), ctx.backend.clone(), ctx.clock.clone());
        Self {
            assessment_id,
            session_id,
            answers,
            answers_ready,
            controller,
            detector,
            timer,
        }
    }

    pub fn assessment_id(&self) -> Uuid {
        self.assessment_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.timer.deadline()
    }

    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }

    pub fn subscribe_remaining(&self) -> watch::Receiver<Duration> {
        self.timer.subscribe()
    }

    pub fn state(&self) -> EscalationState {
        self.controller.state()
    }

    pub fn warnings(&self) -> u32 {
        self.controller.warnings()
    }

    pub fn answers(&self) -> Vec<Option<AnswerValue>> {
        self.answers.snapshot()
    }

    /// Resolves once answers saved by an earlier page load are in the sheet.
    pub async fn answers_restored(&self) {
        if let Some(mut ready) = self.answers_ready.clone() {
            let _ = ready.wait_for(|restored| *restored).await;
        }
    }

    pub fn signal(&self, signal: &PageSignal) -> SignalOutcome {
        self.detector.on_signal(signal)
    }

    pub fn ai_violation(
        &self,
        incident: IncidentType,
        severity: Option<u8>,
        details: Map<String, JsonValue>,
    ) -> SignalOutcome {
        self.detector.on_ai_violation(incident, severity, details)
    }

    pub fn proctoring_verdict(&self, verdict: &ProctoringVerdict) -> Vec<SignalOutcome> {
        self.detector.on_proctoring_verdict(verdict)
    }

    pub fn set_answer(&self, index: usize, value: Option<AnswerValue>) -> Result<()> {
        if !self.controller.accepts_submission() {
            return Err(Error::SessionClosed("Answers can no longer be changed".to_string()));
        }
        self.answers.set(index, value)
    }

    pub async fn submit(&self) -> SubmitOutcome {
        self.controller.submit_manual().await
    }

    /// Owned manual submit, for callers that keep serving the countdown and
    /// notices while the network call runs.
    pub fn submit_task(&self) -> impl Future<Output = SubmitOutcome> + Send + 'static {
        let controller = self.controller.clone();
        async move { controller.submit_manual().await }
    }

    /// Stops the timer, autosave and any running clip. The resume record
    /// stays, so a reload picks the session back up.
    pub fn unmount(&self) {
        self.timer.cancel();
        self.controller.shutdown();
        debug!(session_id = %self.session_id, "Exam view unmounted");
    }
}

impl Drop for ActiveExam {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Loads answers autosaved before a reload. `ready` flips once the attempt
/// is over, whether it found anything or not.
fn spawn_restore(
    ctx: &ExamContext,
    session_id: Uuid,
    answers: Arc<AnswerSheet>,
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let backend = ctx.backend.clone();
    tokio::spawn(async move {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = tokio::time::timeout(SAVED_ANSWERS_TIMEOUT, backend.fetch_saved_answers(session_id)) => fetched,
        };
        match fetched {
            Ok(Ok(saved)) => {
                debug!(%session_id, count = saved.answers.len(), "Saved answers restored");
                answers.restore(saved.answers);
            }
            Ok(Err(e)) => warn!(%session_id, error = %e, "Could not load saved answers, keeping the current sheet"),
            Err(_) => warn!(%session_id, "Loading saved answers timed out, keeping the current sheet"),
        }
        let _ = ready.send(true);
    });
}

fn spawn_autosave(
    ctx: &ExamContext,
    session_id: Uuid,
    answers: Arc<AnswerSheet>,
    controller: std::sync::Weak<EscalationController>,
    cancel: CancellationToken,
) {
    let backend = ctx.backend.clone();
    let period = ctx.policy.autosave_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%session_id, "Autosave stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let armed = controller.upgrade().map_or(false, |c| c.is_armed());
            if !armed {
                continue;
            }
            if let Err(e) = backend.autosave_answers(session_id, &answers.snapshot()).await {
                warn!(%session_id, error = %e, "Autosave failed");
            }
        }
    });
}

/// Asks the backend whether proctoring closed the session, and feeds a
/// termination into the controller.
fn spawn_status_poll(
    ctx: &ExamContext,
    session_id: Uuid,
    controller: std::sync::Weak<EscalationController>,
    cancel: CancellationToken,
) {
    let backend = ctx.backend.clone();
    let period = ctx.policy.status_poll_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%session_id, "Proctoring status poll stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let live = controller.upgrade().map_or(false, |c| !c.state().is_terminal());
            if !live {
                return;
            }
            let status = match backend.fetch_proctoring_status(session_id).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(%session_id, error = %e, "Proctoring status poll failed");
                    continue;
                }
            };
            if status.is_terminated {
                if let Some(controller) = controller.upgrade() {
                    controller.on_external_termination();
                }
                return;
            }
            debug!(%session_id, total_violations = status.total_violations, "Proctoring status checked");
        }
    });
}
