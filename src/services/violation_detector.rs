use crate::dto::proctoring_dto::ProctoringVerdict;
use crate::models::violation::{IncidentType, ViolationEvent};
use crate::services::capability::{PageSignal, Shortcut};
use crate::services::escalation_controller::{Decision, EscalationController};
use crate::services::exam_api::ExamBackend;
use crate::utils::time::Clock;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, warn};

/// How the page should treat a raw signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalClass {
    /// Nothing to do (e.g. the tab became visible again).
    Ignored,
    /// Suppress the default action, but do not count it.
    Blocked,
    Violation(ViolationEvent),
}

pub fn classify(signal: &PageSignal, now: DateTime<Utc>) -> SignalClass {
    match signal {
        PageSignal::VisibilityChanged { hidden: true } => {
            SignalClass::Violation(ViolationEvent::new(IncidentType::TabSwitch, now))
        }
        PageSignal::VisibilityChanged { hidden: false } => SignalClass::Ignored,
        PageSignal::WindowBlur => SignalClass::Violation(ViolationEvent::new(IncidentType::Blur, now)),
        PageSignal::FullscreenChanged { active: false } => {
            SignalClass::Violation(ViolationEvent::new(IncidentType::FullscreenExit, now))
        }
        PageSignal::FullscreenChanged { active: true } => SignalClass::Ignored,
        PageSignal::BlockedShortcut(Shortcut::Escape) => SignalClass::Blocked,
        PageSignal::BlockedShortcut(shortcut) => SignalClass::Violation(
            ViolationEvent::new(IncidentType::CopyPaste, now).with_detail("reason", shortcut.as_str()),
        ),
        PageSignal::PasteIntoAnswer { question_index } => SignalClass::Violation(
            ViolationEvent::new(IncidentType::CopyPaste, now)
                .with_detail("reason", "paste_into_answer")
                .with_detail("question_index", *question_index as u64),
        ),
        PageSignal::ContextMenu | PageSignal::SelectionAttempt => SignalClass::Blocked,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Ignored,
    Blocked,
    /// A violation arrived while the session was not counting.
    Dropped,
    Handled(Decision),
}

/// Normalizes page signals and proctoring detections into violation events
/// and hands them to the escalation controller.
pub struct ViolationDetector {
    session_id: uuid::Uuid,
    controller: Arc<EscalationController>,
    backend: Arc<dyn ExamBackend>,
    clock: Arc<dyn Clock>,
}

impl ViolationDetector {
    pub fn new(controller: Arc<EscalationController>, backend: Arc<dyn ExamBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session_id: controller.session_id(),
            controller,
            backend,
            clock,
        }
    }

    pub fn on_signal(&self, signal: &PageSignal) -> SignalOutcome {
        match classify(signal, self.clock.now()) {
            SignalClass::Ignored => SignalOutcome::Ignored,
            SignalClass::Blocked => SignalOutcome::Blocked,
            SignalClass::Violation(event) => self.dispatch(event, true),
        }
    }

    /// A detection made on this device by the proctoring model.
    pub fn on_ai_violation(
        &self,
        incident: IncidentType,
        severity: Option<u8>,
        details: Map<String, JsonValue>,
    ) -> SignalOutcome {
        let mut event = ViolationEvent::new(incident, self.clock.now());
        if let Some(severity) = severity {
            event = event.with_severity(severity);
        }
        event.details = details;
        self.dispatch(event, true)
    }

    /// A verdict returned by the proctoring service. Its violations are
    /// already on record server-side, so they are counted but not reported.
    pub fn on_proctoring_verdict(&self, verdict: &ProctoringVerdict) -> Vec<SignalOutcome> {
        if verdict.is_terminated {
            self.controller.on_external_termination();
            return Vec::new();
        }
        verdict
            .violations
            .iter()
            .map(|v| {
                let mut event = ViolationEvent::new(v.violation_type, self.clock.now()).with_severity(v.severity);
                event.details = v.details.clone();
                self.dispatch(event, false)
            })
            .collect()
    }

    fn dispatch(&self, event: ViolationEvent, report: bool) -> SignalOutcome {
        if !self.controller.is_armed() {
            debug!(
                incident = event.incident_type.as_str(),
                state = ?self.controller.state(),
                "Violation dropped, session is not counting"
            );
            return SignalOutcome::Dropped;
        }

        if report {
            let backend = self.backend.clone();
            let session_id = self.session_id;
            let reported = event.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.report_violation(session_id, &reported).await {
                    warn!(
                        %session_id,
                        incident = reported.incident_type.as_str(),
                        error = %e,
                        "Failed to report violation"
                    );
                }
            });
        }

        SignalOutcome::Handled(self.controller.on_violation(&event))
    }
}
