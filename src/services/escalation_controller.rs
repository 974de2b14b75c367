use crate::config::SessionPolicy;
use crate::models::evidence_clip::ClipTrigger;
use crate::models::violation::ViolationEvent;
use crate::services::evidence_recorder::EvidenceRecorder;
use crate::services::notices::{NoticeSink, SessionNotice, WarningLevel};
use crate::services::resume_store::ResumeStore;
use crate::services::submission_coordinator::{
    SubmissionCoordinator, SubmissionTicket, SubmitOutcome, SubmitReason,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Active,
    AutoSubmitTriggered,
    ExternallyTerminated,
    Cancelled,
    Submitted,
}

impl EscalationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EscalationState::ExternallyTerminated | EscalationState::Cancelled | EscalationState::Submitted
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EscalationInput<'a> {
    Violation(&'a ViolationEvent),
    ExternalTermination,
    SubmissionSucceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Dropped,
    Warn { level: WarningLevel, count: u32 },
    ForceSubmit { count: u32 },
    Terminate,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub effect: Effect,
    pub capture_evidence: bool,
}

impl Decision {
    fn plain(effect: Effect) -> Self {
        Self {
            effect,
            capture_evidence: false,
        }
    }
}

/// Pure warning-count state machine. Side effects are described by the
/// returned `Decision` and carried out by `EscalationController`.
#[derive(Debug, Clone)]
pub struct EscalationMachine {
    state: EscalationState,
    warnings: u32,
    max_warnings: u32,
    evidence_min_severity: u8,
}

impl EscalationMachine {
    pub fn new(policy: &SessionPolicy) -> Self {
        Self {
            state: EscalationState::Active,
            warnings: 0,
            max_warnings: policy.max_warnings.max(1),
            evidence_min_severity: policy.evidence_min_severity,
        }
    }

    /// A machine for an attempt that was already cancelled on this device.
    pub fn cancelled(policy: &SessionPolicy) -> Self {
        Self {
            state: EscalationState::Cancelled,
            ..Self::new(policy)
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    pub fn max_warnings(&self) -> u32 {
        self.max_warnings
    }

    pub fn apply(&mut self, input: EscalationInput<'_>) -> Decision {
        match (self.state, input) {
            (EscalationState::Active, EscalationInput::Violation(event)) => {
                self.warnings += 1;
                let effect = if self.warnings >= self.max_warnings {
                    self.state = EscalationState::AutoSubmitTriggered;
                    Effect::ForceSubmit { count: self.warnings }
                } else {
                    Effect::Warn {
                        level: WarningLevel::for_count(self.warnings),
                        count: self.warnings,
                    }
                };
                Decision {
                    effect,
                    capture_evidence: event.severity >= self.evidence_min_severity,
                }
            }
            (
                EscalationState::Active | EscalationState::AutoSubmitTriggered,
                EscalationInput::ExternalTermination,
            ) => {
                self.state = EscalationState::ExternallyTerminated;
                Decision::plain(Effect::Terminate)
            }
            (
                EscalationState::Active | EscalationState::AutoSubmitTriggered,
                EscalationInput::SubmissionSucceeded,
            ) => {
                self.state = EscalationState::Submitted;
                Decision::plain(Effect::Settled)
            }
            _ => Decision::plain(Effect::Dropped),
        }
    }
}

/// Turns violations into warnings, evidence clips and, at the limit, a
/// forced submission. Also routes timer expiry and manual submits so all
/// three share one exactly-once submission.
pub struct EscalationController {
    session_id: Uuid,
    assessment_id: Uuid,
    machine: Mutex<EscalationMachine>,
    coordinator: Arc<SubmissionCoordinator>,
    recorder: Arc<EvidenceRecorder>,
    resume: ResumeStore,
    notices: NoticeSink,
    teardown: CancellationToken,
    this: Weak<EscalationController>,
}

impl EscalationController {
    pub fn new(
        session_id: Uuid,
        assessment_id: Uuid,
        policy: &SessionPolicy,
        coordinator: Arc<SubmissionCoordinator>,
        recorder: Arc<EvidenceRecorder>,
        resume: ResumeStore,
        notices: NoticeSink,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            session_id,
            assessment_id,
            machine: Mutex::new(EscalationMachine::new(policy)),
            coordinator,
            recorder,
            resume,
            notices,
            teardown: CancellationToken::new(),
            this: this.clone(),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> EscalationState {
        self.machine().state()
    }

    pub fn warnings(&self) -> u32 {
        self.machine().warnings()
    }

    /// Cancelled once the session reaches a terminal state. Timers and
    /// background loops hang off this token.
    pub fn teardown_token(&self) -> &CancellationToken {
        &self.teardown
    }

    /// Whether new violations are still counted.
    pub fn is_armed(&self) -> bool {
        self.state() == EscalationState::Active && !self.coordinator.is_in_flight() && !self.coordinator.is_finished()
    }

    /// Whether the student can still change answers or submit.
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self.state(),
            EscalationState::Active | EscalationState::AutoSubmitTriggered
        ) && !self.coordinator.is_finished()
    }

    pub fn on_violation(&self, event: &ViolationEvent) -> Decision {
        let (decision, max) = {
            let mut machine = self.machine();
            (machine.apply(EscalationInput::Violation(event)), machine.max_warnings())
        };

        // Started before a forced submission is claimed, so the submission flushes it.
        if decision.capture_evidence {
            self.recorder.start_clip(ClipTrigger {
                session_id: self.session_id,
                reason: event.incident_type.into(),
                severity: event.severity,
                description: event
                    .reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| event.incident_type.as_str().to_string()),
            });
        }

        match decision.effect {
            Effect::Warn { level, count } => {
                info!(
                    session_id = %self.session_id,
                    incident = event.incident_type.as_str(),
                    severity = event.severity,
                    count,
                    max,
                    "Integrity warning issued"
                );
                self.notices.send(SessionNotice::Warning {
                    level,
                    count,
                    max,
                    incident: event.incident_type,
                });
            }
            Effect::ForceSubmit { count } => {
                warn!(
                    session_id = %self.session_id,
                    incident = event.incident_type.as_str(),
                    count,
                    "Warning limit reached, forcing submission"
                );
                self.force_submit();
            }
            _ => debug!(incident = event.incident_type.as_str(), "Violation ignored in current state"),
        }
        decision
    }

    pub fn on_external_termination(&self) {
        let decision = self.machine().apply(EscalationInput::ExternalTermination);
        if decision.effect != Effect::Terminate {
            return;
        }
        warn!(session_id = %self.session_id, "Proctoring terminated the session");
        match self.coordinator.begin(SubmitReason::Forced) {
            Some(ticket) => self.spawn_terminate(ticket),
            None => debug!("Submission in flight, termination cleanup deferred"),
        }
    }

    /// Called by the session timer. Never blocks.
    pub fn on_deadline_expired(&self) {
        if !self.accepts_submission() {
            return;
        }
        if let Some(ticket) = self.coordinator.begin(SubmitReason::Timeout) {
            self.spawn_submission(ticket);
        }
    }

    pub async fn submit_manual(&self) -> SubmitOutcome {
        if !self.accepts_submission() {
            return match self.state() {
                EscalationState::Submitted => SubmitOutcome::AlreadyFinished,
                state => SubmitOutcome::Refused(format!("session is {:?}", state)),
            };
        }
        match self.coordinator.begin(SubmitReason::Manual) {
            Some(ticket) => {
                let outcome = self.coordinator.run(ticket).await;
                self.after_submission(&outcome);
                outcome
            }
            None => self.coordinator.busy_outcome(),
        }
    }

    /// Stops everything hanging off this session without submitting.
    pub fn shutdown(&self) {
        self.teardown.cancel();
        self.recorder.abandon();
    }

    fn force_submit(&self) {
        let Some(ticket) = self.coordinator.begin(SubmitReason::Forced) else {
            debug!("Submission already in flight, forced submission absorbed");
            return;
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = this.resume.mark_cancelled(this.assessment_id).await {
                warn!(assessment_id = %this.assessment_id, error = %e, "Failed to persist cancelled flag");
            }
            let outcome = this.coordinator.run(ticket).await;
            this.after_submission(&outcome);
        });
    }

    fn spawn_submission(&self, ticket: SubmissionTicket) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let outcome = this.coordinator.run(ticket).await;
            this.after_submission(&outcome);
        });
    }

    fn spawn_terminate(&self, ticket: SubmissionTicket) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.coordinator.terminate(ticket).await;
            this.teardown.cancel();
        });
    }

    fn after_submission(&self, outcome: &SubmitOutcome) {
        match outcome {
            SubmitOutcome::Submitted(_) => {
                self.machine().apply(EscalationInput::SubmissionSucceeded);
                self.teardown.cancel();
            }
            SubmitOutcome::Failed { .. } if self.state() == EscalationState::ExternallyTerminated => {
                if let Some(ticket) = self.coordinator.begin(SubmitReason::Forced) {
                    self.spawn_terminate(ticket);
                }
            }
            _ => {}
        }
    }

    fn machine(&self) -> MutexGuard<'_, EscalationMachine> {
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
