use crate::models::violation::IncidentType;
use crate::services::submission_coordinator::SubmitReason;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningLevel {
    /// Transient notice.
    Notice,
    /// Requires an explicit acknowledgement before the student continues.
    Blocking,
}

impl WarningLevel {
    pub fn for_count(count: u32) -> Self {
        if count <= 1 {
            WarningLevel::Notice
        } else {
            WarningLevel::Blocking
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamOutcome {
    Submitted { reason: SubmitReason },
    Terminated,
}

/// Everything the session wants to show the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Warning {
        level: WarningLevel,
        count: u32,
        max: u32,
        incident: IncidentType,
    },
    CapabilityUnavailable {
        capability: String,
        message: String,
    },
    Submitting {
        reason: SubmitReason,
        message: String,
    },
    SubmissionFailed {
        reason: SubmitReason,
        message: String,
    },
    /// Leave the exam view.
    Finished { outcome: ExamOutcome },
}

#[derive(Debug, Clone)]
pub struct NoticeSink {
    tx: mpsc::UnboundedSender<SessionNotice>,
}

impl NoticeSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, notice: SessionNotice) {
        if self.tx.send(notice).is_err() {
            debug!("Notice dropped, no view is listening");
        }
    }
}
