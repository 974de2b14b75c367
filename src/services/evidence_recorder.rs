use crate::models::evidence_clip::{ClipTrigger, EvidenceClip};
use crate::services::capability::{ClipRecorder, MediaCapability};
use crate::services::exam_api::ExamBackend;
use crate::services::notices::{NoticeSink, SessionNotice};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipStart {
    Started,
    AlreadyRecording,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipStop {
    NoOp,
    Uploaded { duration_seconds: u32 },
    UploadFailed { duration_seconds: u32 },
    CaptureFailed,
}

struct ActiveClip {
    id: u64,
    trigger: ClipTrigger,
    started_at: Instant,
    recorder: Box<dyn ClipRecorder>,
    auto_stop: Option<AbortHandle>,
}

/// Owns the media stream while a clip is running. At most one clip exists at
/// a time; triggers that arrive mid-recording are dropped.
pub struct EvidenceRecorder {
    media: Arc<dyn MediaCapability>,
    backend: Arc<dyn ExamBackend>,
    notices: NoticeSink,
    max_duration: Duration,
    active: Mutex<Option<ActiveClip>>,
    /// Held for the whole stop-and-upload, so a later `stop_clip` waits for
    /// an auto-stop upload that is still running.
    finishing: tokio::sync::Mutex<()>,
    /// Auto-stop task currently uploading, if any.
    uploading: Mutex<Option<AbortHandle>>,
    next_id: AtomicU64,
    unavailable_noticed: AtomicBool,
    this: Weak<EvidenceRecorder>,
}

impl EvidenceRecorder {
    pub fn new(
        media: Arc<dyn MediaCapability>,
        backend: Arc<dyn ExamBackend>,
        notices: NoticeSink,
        max_duration: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            media,
            backend,
            notices,
            max_duration,
            active: Mutex::new(None),
            finishing: tokio::sync::Mutex::new(()),
            uploading: Mutex::new(None),
            next_id: AtomicU64::new(1),
            unavailable_noticed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    /// Emits the capability notice at most once per session.
    pub fn check_capability(&self) -> bool {
        if self.media.has_live_stream() {
            return true;
        }
        self.notice_unavailable("camera stream is not available");
        false
    }

    pub fn start_clip(&self, trigger: ClipTrigger) -> ClipStart {
        let mut active = self.lock();
        if active.is_some() {
            debug!(reason = trigger.reason.as_str(), "Evidence clip already recording, trigger ignored");
            return ClipStart::AlreadyRecording;
        }
        if !self.media.has_live_stream() {
            drop(active);
            self.notice_unavailable("camera stream is not available");
            return ClipStart::Unavailable;
        }

        let recorder = match self.media.start_recorder() {
            Ok(recorder) => recorder,
            Err(e) => {
                drop(active);
                warn!(error = %e, "Could not start evidence recorder");
                self.notice_unavailable(&e.to_string());
                return ClipStart::Unavailable;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let weak = self.this.clone();
        let ceiling = self.max_duration;
        let auto_stop = tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            if let Some(recorder) = weak.upgrade() {
                recorder.finish(Some(id), true).await;
            }
        });

        info!(
            session_id = %trigger.session_id,
            reason = trigger.reason.as_str(),
            severity = trigger.severity,
            "Evidence clip recording started"
        );
        *active = Some(ActiveClip {
            id,
            trigger,
            started_at: Instant::now(),
            recorder,
            auto_stop: Some(auto_stop.abort_handle()),
        });
        ClipStart::Started
    }

    /// Stops the running clip and uploads it. Calling this with nothing
    /// recording is a no-op. Upload failures are logged and swallowed.
    ///
    /// If the auto-stop is already uploading, this returns once that upload
    /// has settled.
    pub async fn stop_clip(&self) -> ClipStop {
        self.finish(None, false).await
    }

    /// Aborts any running clip and any auto-stop upload without waiting (unmount).
    pub fn abandon(&self) {
        if let Some(mut clip) = self.lock().take() {
            if let Some(handle) = clip.auto_stop.take() {
                handle.abort();
            }
            debug!(reason = clip.trigger.reason.as_str(), "Evidence clip abandoned");
        }
        if let Some(handle) = lock_slot(&self.uploading).take() {
            handle.abort();
            debug!("In-flight evidence upload abandoned");
        }
    }

    async fn finish(&self, only_id: Option<u64>, from_timer: bool) -> ClipStop {
        let _finishing = self.finishing.lock().await;
        let clip = {
            let mut active = self.lock();
            match active.as_ref() {
                Some(clip) if only_id.map_or(true, |id| id == clip.id) => active.take(),
                _ => None,
            }
        };
        let Some(mut clip) = clip else {
            return ClipStop::NoOp;
        };

        if let Some(handle) = clip.auto_stop.take() {
            if from_timer {
                // The timer task is the caller; aborting it would cut this upload short.
                *lock_slot(&self.uploading) = Some(handle);
            } else {
                handle.abort();
            }
        }

        let outcome = self.upload(clip).await;
        if from_timer {
            lock_slot(&self.uploading).take();
        }
        outcome
    }

    async fn upload(&self, clip: ActiveClip) -> ClipStop {
        let elapsed = clip.started_at.elapsed().min(self.max_duration);
        let duration_seconds = (elapsed.as_secs_f64().round() as u32).max(1);

        let chunks = match clip.recorder.stop().await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Evidence recorder failed to stop cleanly");
                return ClipStop::CaptureFailed;
            }
        };

        let mut blob = BytesMut::with_capacity(chunks.iter().map(|c| c.len()).sum());
        for chunk in &chunks {
            blob.extend_from_slice(chunk);
        }

        let evidence = EvidenceClip {
            session_id: clip.trigger.session_id,
            trigger_reason: clip.trigger.reason,
            trigger_severity: clip.trigger.severity,
            trigger_description: clip.trigger.description,
            duration_seconds,
            blob: blob.freeze(),
        };

        match self.backend.upload_evidence_clip(&evidence).await {
            Ok(()) => {
                info!(
                    session_id = %evidence.session_id,
                    reason = evidence.trigger_reason.as_str(),
                    duration_seconds,
                    bytes = evidence.blob.len(),
                    "Evidence clip uploaded"
                );
                ClipStop::Uploaded { duration_seconds }
            }
            Err(e) => {
                warn!(error = %e, session_id = %evidence.session_id, "Evidence clip upload failed");
                ClipStop::UploadFailed { duration_seconds }
            }
        }
    }

    fn notice_unavailable(&self, message: &str) {
        if !self.unavailable_noticed.swap(true, Ordering::SeqCst) {
            self.notices.send(SessionNotice::CapabilityUnavailable {
                capability: "camera".to_string(),
                message: message.to_string(),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveClip>> {
        lock_slot(&self.active)
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for EvidenceRecorder {
    fn drop(&mut self) {
        self.abandon();
    }
}
