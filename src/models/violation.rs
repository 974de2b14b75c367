use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Every kind of incident the session can react to. The first four are
/// detected in the page; the rest come from the proctoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    TabSwitch,
    Blur,
    FullscreenExit,
    CopyPaste,
    NoFace,
    MultipleFaces,
    LookingAway,
    FaceNotMatched,
    AudioTalking,
    CameraOff,
    ObjectDetected,
    PhoneDetected,
    BookDetected,
    LaptopDetected,
    PersonLeft,
    IntermittentFace,
    PersistentGazeAway,
    MultiplePersonsPattern,
    IdentityMismatchPattern,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentOrigin {
    Client,
    Proctoring,
}

impl IncidentType {
    pub fn origin(self) -> IncidentOrigin {
        match self {
            IncidentType::TabSwitch
            | IncidentType::Blur
            | IncidentType::FullscreenExit
            | IncidentType::CopyPaste => IncidentOrigin::Client,
            _ => IncidentOrigin::Proctoring,
        }
    }

    pub fn default_severity(self) -> u8 {
        match self {
            IncidentType::MultipleFaces
            | IncidentType::FaceNotMatched
            | IncidentType::ObjectDetected
            | IncidentType::PhoneDetected
            | IncidentType::BookDetected
            | IncidentType::LaptopDetected => 5,
            IncidentType::TabSwitch
            | IncidentType::FullscreenExit
            | IncidentType::NoFace
            | IncidentType::CameraOff
            | IncidentType::PersonLeft
            | IncidentType::IntermittentFace
            | IncidentType::PersistentGazeAway
            | IncidentType::MultiplePersonsPattern
            | IncidentType::IdentityMismatchPattern => 4,
            IncidentType::CopyPaste | IncidentType::AudioTalking => 3,
            IncidentType::Blur | IncidentType::LookingAway | IncidentType::Unknown => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentType::TabSwitch => "TAB_SWITCH",
            IncidentType::Blur => "BLUR",
            IncidentType::FullscreenExit => "FULLSCREEN_EXIT",
            IncidentType::CopyPaste => "COPY_PASTE",
            IncidentType::NoFace => "NO_FACE",
            IncidentType::MultipleFaces => "MULTIPLE_FACES",
            IncidentType::LookingAway => "LOOKING_AWAY",
            IncidentType::FaceNotMatched => "FACE_NOT_MATCHED",
            IncidentType::AudioTalking => "AUDIO_TALKING",
            IncidentType::CameraOff => "CAMERA_OFF",
            IncidentType::ObjectDetected => "OBJECT_DETECTED",
            IncidentType::PhoneDetected => "PHONE_DETECTED",
            IncidentType::BookDetected => "BOOK_DETECTED",
            IncidentType::LaptopDetected => "LAPTOP_DETECTED",
            IncidentType::PersonLeft => "PERSON_LEFT",
            IncidentType::IntermittentFace => "INTERMITTENT_FACE",
            IncidentType::PersistentGazeAway => "PERSISTENT_GAZE_AWAY",
            IncidentType::MultiplePersonsPattern => "MULTIPLE_PERSONS_PATTERN",
            IncidentType::IdentityMismatchPattern => "IDENTITY_MISMATCH_PATTERN",
            IncidentType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 5;

/// One detected incident. Built once by the detector and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub incident_type: IncidentType,
    pub severity: u8,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, JsonValue>,
}

impl ViolationEvent {
    pub fn new(incident_type: IncidentType, occurred_at: DateTime<Utc>) -> Self {
        Self {
            incident_type,
            severity: incident_type.default_severity(),
            occurred_at,
            details: Map::new(),
        }
    }

    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity.clamp(MIN_SEVERITY, MAX_SEVERITY);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn reason(&self) -> Option<&str> {
        self.details.get("reason").and_then(|v| v.as_str())
    }
}
