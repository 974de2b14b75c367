use crate::models::violation::IncidentType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    MultipleFaces,
    NoFace,
    LookingAway,
    PhoneDetected,
    BookDetected,
    AudioTalking,
    TabSwitch,
    FullscreenExit,
    Other,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::MultipleFaces => "MULTIPLE_FACES",
            TriggerReason::NoFace => "NO_FACE",
            TriggerReason::LookingAway => "LOOKING_AWAY",
            TriggerReason::PhoneDetected => "PHONE_DETECTED",
            TriggerReason::BookDetected => "BOOK_DETECTED",
            TriggerReason::AudioTalking => "AUDIO_TALKING",
            TriggerReason::TabSwitch => "TAB_SWITCH",
            TriggerReason::FullscreenExit => "FULLSCREEN_EXIT",
            TriggerReason::Other => "OTHER",
        }
    }
}

impl From<IncidentType> for TriggerReason {
    fn from(incident: IncidentType) -> Self {
        match incident {
            IncidentType::MultipleFaces | IncidentType::MultiplePersonsPattern => {
                TriggerReason::MultipleFaces
            }
            IncidentType::NoFace | IncidentType::PersonLeft | IncidentType::IntermittentFace => {
                TriggerReason::NoFace
            }
            IncidentType::LookingAway | IncidentType::PersistentGazeAway => TriggerReason::LookingAway,
            IncidentType::PhoneDetected => TriggerReason::PhoneDetected,
            IncidentType::BookDetected => TriggerReason::BookDetected,
            IncidentType::AudioTalking => TriggerReason::AudioTalking,
            IncidentType::TabSwitch => TriggerReason::TabSwitch,
            IncidentType::FullscreenExit => TriggerReason::FullscreenExit,
            _ => TriggerReason::Other,
        }
    }
}

/// What caused a clip to be recorded.
#[derive(Debug, Clone)]
pub struct ClipTrigger {
    pub session_id: Uuid,
    pub reason: TriggerReason,
    pub severity: u8,
    pub description: String,
}

/// A finished recording, ready for upload.
#[derive(Debug, Clone)]
pub struct EvidenceClip {
    pub session_id: Uuid,
    pub trigger_reason: TriggerReason,
    pub trigger_severity: u8,
    pub trigger_description: String,
    pub duration_seconds: u32,
    pub blob: Bytes,
}
