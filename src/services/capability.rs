use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Raw signals raised by the page hosting the exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    VisibilityChanged { hidden: bool },
    WindowBlur,
    FullscreenChanged { active: bool },
    BlockedShortcut(Shortcut),
    ContextMenu,
    SelectionAttempt,
    PasteIntoAnswer { question_index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Copy,
    Cut,
    Paste,
    SelectAll,
    Print,
    Save,
    DevTools,
    Escape,
}

impl Shortcut {
    pub fn as_str(self) -> &'static str {
        match self {
            Shortcut::Copy => "copy",
            Shortcut::Cut => "cut",
            Shortcut::Paste => "paste",
            Shortcut::SelectAll => "select_all",
            Shortcut::Print => "print",
            Shortcut::Save => "save",
            Shortcut::DevTools => "devtools",
            Shortcut::Escape => "escape",
        }
    }
}

/// Camera/microphone stream plus the ability to record it.
pub trait MediaCapability: Send + Sync {
    fn has_live_stream(&self) -> bool;

    /// Starts recording the live stream. Fails while another recorder is active.
    fn start_recorder(&self) -> Result<Box<dyn ClipRecorder>>;
}

#[async_trait]
pub trait ClipRecorder: Send {
    /// Stops recording and resolves once the final chunk has been flushed.
    async fn stop(self: Box<Self>) -> Result<Vec<Bytes>>;
}

#[async_trait]
pub trait FullscreenControl: Send + Sync {
    fn is_active(&self) -> bool;
    async fn enter(&self) -> Result<()>;
    async fn exit(&self) -> Result<()>;
}

/// Media capability fed chunk by chunk by whatever capture backend is in use.
/// Recorders receive every chunk pushed between start and stop.
pub struct ChunkFeed {
    tx: broadcast::Sender<Bytes>,
    live: AtomicBool,
    recording: Arc<AtomicBool>,
}

impl ChunkFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            live: AtomicBool::new(true),
            recording: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, chunk: Bytes) {
        // No receivers simply means nothing is recording.
        let _ = self.tx.send(chunk);
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

impl MediaCapability for ChunkFeed {
    fn has_live_stream(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn start_recorder(&self) -> Result<Box<dyn ClipRecorder>> {
        if !self.has_live_stream() {
            return Err(Error::Capability("no live media stream".to_string()));
        }
        if self
            .recording
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Capability("media stream is already being recorded".to_string()));
        }

        let mut rx = self.tx.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let collector = tokio::spawn(async move {
            let mut chunks = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    msg = rx.recv() => match msg {
                        Ok(chunk) => chunks.push(chunk),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Evidence recorder fell behind the media stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            while let Ok(chunk) = rx.try_recv() {
                chunks.push(chunk);
            }
            chunks
        });

        debug!("Media recorder started");
        Ok(Box::new(FeedRecorder {
            stop_tx: Some(stop_tx),
            collector,
            recording: self.recording.clone(),
        }))
    }
}

struct FeedRecorder {
    stop_tx: Option<oneshot::Sender<()>>,
    collector: JoinHandle<Vec<Bytes>>,
    recording: Arc<AtomicBool>,
}

#[async_trait]
impl ClipRecorder for FeedRecorder {
    async fn stop(mut self: Box<Self>) -> Result<Vec<Bytes>> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let result = (&mut self.collector)
            .await
            .map_err(|e| Error::Capability(format!("media recorder failed: {}", e)));
        self.recording.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for FeedRecorder {
    fn drop(&mut self) {
        // A recorder dropped without stop() must not hold the stream forever.
        if self.stop_tx.is_some() {
            self.collector.abort();
            self.recording.store(false, Ordering::SeqCst);
        }
    }
}

/// Media capability for environments with no camera at all.
#[derive(Debug, Default)]
pub struct HeadlessMedia;

impl MediaCapability for HeadlessMedia {
    fn has_live_stream(&self) -> bool {
        false
    }

    fn start_recorder(&self) -> Result<Box<dyn ClipRecorder>> {
        Err(Error::Capability("media recording is not supported".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct HeadlessFullscreen;

#[async_trait]
impl FullscreenControl for HeadlessFullscreen {
    fn is_active(&self) -> bool {
        false
    }

    async fn enter(&self) -> Result<()> {
        Err(Error::Capability("fullscreen is not supported".to_string()))
    }

    async fn exit(&self) -> Result<()> {
        Ok(())
    }
}
