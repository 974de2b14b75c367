use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only state kept on the device between page loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_id: Option<Uuid>,
    pub server_deadline_ms: Option<i64>,
    #[serde(default)]
    pub consent_given: bool,
    #[serde(default)]
    pub cancelled: bool,
}

impl ResumeRecord {
    pub fn started(session_id: Uuid, server_deadline_ms: i64) -> Self {
        Self {
            session_id: Some(session_id),
            server_deadline_ms: Some(server_deadline_ms),
            consent_given: true,
            cancelled: false,
        }
    }

    /// Session id and deadline are written and cleared together; one without
    /// the other means the record cannot be trusted.
    pub fn is_consistent(&self) -> bool {
        self.session_id.is_some() == self.server_deadline_ms.is_some()
    }
}
