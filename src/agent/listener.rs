//! Progress listener contract shared by all agents.

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::progress::format_bytes;
use crate::protocol::{EventType, Frame};
use crate::transfer::SessionId;

/// Normalized progress, independent of the agent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Job about to launch its sessions (once per job)
    PreStart,
    SessionStart,
    /// Total bytes the session expects to move
    SessionSize(u64),
    /// Bytes moved so far
    Transfer(u64),
    /// Session finished, successfully or not (once per session)
    End,
}

impl ProgressEvent {
    /// Progress carried by a management frame.
    ///
    /// DONE and ERROR map to nothing here: `End` is emitted by the session
    /// task once its retries are over.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let number = |key: &str| frame.get(key).and_then(|v| v.trim().parse::<u64>().ok());
        match frame.event_type() {
            EventType::Init => Some(Self::SessionStart),
            EventType::Notification => number("PreTransferBytes").map(Self::SessionSize),
            EventType::Stats => number("Bytescont").map(Self::Transfer),
            _ => None,
        }
    }
}

pub trait TransferListener: Send + Sync {
    fn on_progress(&self, session: &SessionId, event: ProgressEvent);

    /// Raw management frames, direct sessions only.
    fn on_management(&self, _session: &SessionId, _frame: &Frame) {}
}

/// Fan-out to registered listeners, cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn TransferListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn TransferListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn progress(&self, session: &SessionId, event: ProgressEvent) {
        for listener in &self.listeners {
            listener.on_progress(session, event);
        }
    }

    pub fn management(&self, session: &SessionId, frame: &Frame) {
        for listener in &self.listeners {
            listener.on_management(session, frame);
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Writes lifecycle events to the tracing log.
#[derive(Debug, Default)]
pub struct LogListener;

impl TransferListener for LogListener {
    fn on_progress(&self, session: &SessionId, event: ProgressEvent) {
        match event {
            ProgressEvent::PreStart => info!(job = %session.job, "transfer starting"),
            ProgressEvent::SessionStart => info!(%session, "session started"),
            ProgressEvent::SessionSize(bytes) => {
                debug!(%session, size = %format_bytes(bytes), "session size")
            }
            ProgressEvent::Transfer(bytes) => debug!(%session, bytes, "progress"),
            ProgressEvent::End => info!(%session, "session ended"),
        }
    }

    fn on_management(&self, session: &SessionId, frame: &Frame) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let event = frame.enhanced();
            match serde_json::to_string(&event) {
                Ok(json) => trace!(%session, event = %json, "management frame"),
                Err(e) => trace!(%session, "unprintable management frame: {e}"),
            }
        }
    }
}
