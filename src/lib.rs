pub mod config;
pub mod dto;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::{Config, SessionPolicy};
use crate::error::Result;
use crate::services::{
    capability::{FullscreenControl, HeadlessFullscreen, HeadlessMedia, MediaCapability},
    exam_api::{ExamBackend, HttpExamBackend},
    resume_store::{JsonFileStorage, ResumeStorage, ResumeStore},
};
use crate::utils::time::{Clock, MonotonicClock};
use std::sync::Arc;

/// Everything an exam session needs from the outside world.
#[derive(Clone)]
pub struct ExamContext {
    pub backend: Arc<dyn ExamBackend>,
    pub resume: ResumeStore,
    pub media: Arc<dyn MediaCapability>,
    pub fullscreen: Arc<dyn FullscreenControl>,
    pub clock: Arc<dyn Clock>,
    pub policy: SessionPolicy,
}

impl ExamContext {
    pub fn new(
        backend: Arc<dyn ExamBackend>,
        storage: Arc<dyn ResumeStorage>,
        media: Arc<dyn MediaCapability>,
        fullscreen: Arc<dyn FullscreenControl>,
    ) -> Self {
        Self {
            backend,
            resume: ResumeStore::new(storage),
            media,
            fullscreen,
            clock: Arc::new(MonotonicClock::new()),
            policy: SessionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// HTTP backend and file-backed resume store, no camera or fullscreen.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpExamBackend::from_config(config)?;
        let storage = JsonFileStorage::new(&config.resume_store_dir);
        Ok(Self::new(
            Arc::new(backend),
            Arc::new(storage),
            Arc::new(HeadlessMedia),
            Arc::new(HeadlessFullscreen),
        )
        .with_policy(config.policy()))
    }
}
