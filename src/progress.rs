//! Terminal progress bars, one per session.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::agent::{ProgressEvent, TransferListener};
use crate::transfer::SessionId;

const BAR_TEMPLATE: &str =
    "{msg} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

pub struct ProgressBarListener {
    multi: MultiProgress,
    bars: Mutex<HashMap<SessionId, ProgressBar>>,
}

impl ProgressBarListener {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Listener that tracks state without drawing.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, session: &SessionId) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        bars.entry(session.clone())
            .or_insert_with(|| {
                let style = ProgressStyle::with_template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-");
                let bar = self.multi.add(ProgressBar::new(0).with_style(style));
                bar.set_message(format!("session {}", session.index + 1));
                bar
            })
            .clone()
    }

    /// Current position of a session's bar, if it has one.
    pub fn position(&self, session: &SessionId) -> Option<u64> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .map(ProgressBar::position)
    }
}

impl Default for ProgressBarListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferListener for ProgressBarListener {
    fn on_progress(&self, session: &SessionId, event: ProgressEvent) {
        match event {
            ProgressEvent::PreStart => {}
            ProgressEvent::SessionStart => {
                self.bar(session);
            }
            ProgressEvent::SessionSize(bytes) => self.bar(session).set_length(bytes),
            ProgressEvent::Transfer(bytes) => self.bar(session).set_position(bytes),
            ProgressEvent::End => self.bar(session).finish(),
        }
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_tracks_position() {
        let listener = ProgressBarListener::hidden();
        let id = SessionId::new("job".into(), 0);
        assert_eq!(listener.position(&id), None);

        listener.on_progress(&id, ProgressEvent::SessionStart);
        listener.on_progress(&id, ProgressEvent::SessionSize(1000));
        listener.on_progress(&id, ProgressEvent::Transfer(250));
        assert_eq!(listener.position(&id), Some(250));
        listener.on_progress(&id, ProgressEvent::End);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }
}
