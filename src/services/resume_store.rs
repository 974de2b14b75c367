use crate::error::{Error, Result};
use crate::models::resume_record::ResumeRecord;
use crate::utils::time::{from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Namespaced key/value persistence for resume records.
#[async_trait]
pub trait ResumeStorage: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<ResumeRecord>>;
    /// Replaces the whole record in one write.
    async fn save(&self, key: &str, record: &ResumeRecord) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, ResumeRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResumeRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResumeStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<ResumeRecord>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn save(&self, key: &str, record: &ResumeRecord) -> Result<()> {
        self.entries().insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One JSON file per key. Writes go to a temp file that is renamed over the
/// target, so a crash never leaves half a record behind.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

#[async_trait]
impl ResumeStorage for JsonFileStorage {
    async fn load(&self, key: &str) -> Result<Option<ResumeRecord>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<ResumeRecord>(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable resume record, ignoring it");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn save(&self, key: &str, record: &ResumeRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(record)?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("replace {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// What the exam view should do at mount time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// The student already exceeded the violation limit; no retake.
    Cancelled,
    /// A live session exists; go straight to the timed view.
    Resume { session_id: Uuid, deadline: DateTime<Utc> },
    /// The stored deadline has passed; force the submission now.
    Expired { session_id: Uuid, deadline: DateTime<Utc> },
    /// Nothing to resume; show the pre-exam screens.
    Fresh { consent_given: bool },
}

/// The single source of truth for "was a session already started here".
#[derive(Clone)]
pub struct ResumeStore {
    storage: Arc<dyn ResumeStorage>,
}

impl ResumeStore {
    pub fn new(storage: Arc<dyn ResumeStorage>) -> Self {
        Self { storage }
    }

    pub fn key(assessment_id: Uuid) -> String {
        format!("exam_session:{}", assessment_id)
    }

    pub async fn load(&self, assessment_id: Uuid) -> Result<Option<ResumeRecord>> {
        self.storage.load(&Self::key(assessment_id)).await
    }

    pub async fn resolve(&self, assessment_id: Uuid, now: DateTime<Utc>) -> Result<ResumeDecision> {
        let Some(record) = self.load(assessment_id).await? else {
            return Ok(ResumeDecision::Fresh { consent_given: false });
        };

        if record.cancelled {
            return Ok(ResumeDecision::Cancelled);
        }

        if !record.is_consistent() {
            warn!(%assessment_id, "Resume record has a session id or deadline but not both, discarding it");
            self.clear(assessment_id).await?;
            return Ok(ResumeDecision::Fresh { consent_given: false });
        }

        let session = record
            .session_id
            .zip(record.server_deadline_ms.and_then(from_millis));
        match session {
            Some((session_id, deadline)) if now < deadline => {
                debug!(%assessment_id, %session_id, "Resuming exam session from local record");
                Ok(ResumeDecision::Resume { session_id, deadline })
            }
            Some((session_id, deadline)) => {
                info!(%assessment_id, %session_id, "Stored deadline already passed on mount");
                Ok(ResumeDecision::Expired { session_id, deadline })
            }
            None => Ok(ResumeDecision::Fresh {
                consent_given: record.consent_given,
            }),
        }
    }

    pub async fn record_consent(&self, assessment_id: Uuid) -> Result<()> {
        let mut record = self.load(assessment_id).await?.unwrap_or_default();
        record.consent_given = true;
        self.storage.save(&Self::key(assessment_id), &record).await
    }

    pub async fn begin(&self, assessment_id: Uuid, session_id: Uuid, deadline: DateTime<Utc>) -> Result<()> {
        let record = ResumeRecord::started(session_id, to_millis(deadline));
        self.storage.save(&Self::key(assessment_id), &record).await
    }

    /// Marks the attempt as cancelled. The rest of the record is kept so a
    /// reload mid-submission still lands on the blocked screen.
    pub async fn mark_cancelled(&self, assessment_id: Uuid) -> Result<()> {
        let mut record = self.load(assessment_id).await?.unwrap_or_default();
        record.cancelled = true;
        self.storage.save(&Self::key(assessment_id), &record).await
    }

    /// Removes all four fields at once.
    pub async fn clear(&self, assessment_id: Uuid) -> Result<()> {
        self.storage.remove(&Self::key(assessment_id)).await
    }

    /// Explicitly lifts a cancellation, e.g. after staff approve a retake.
    pub async fn reset(&self, assessment_id: Uuid) -> Result<()> {
        info!(%assessment_id, "Resume record reset");
        self.clear(assessment_id).await
    }
}
