//! UI-side state and the log lines produced from queue events.

use crate::queue::QueueEvent;

/// Lines kept in the event log.
const LOG_CAPACITY: usize = 200;

/// State owned by the UI loop, separate from the queue snapshot.
#[derive(Clone, Debug, Default)]
pub struct UiState {
    /// Selected row in the queue table.
    pub selected: usize,
    /// Event log, oldest first.
    pub log: Vec<String>,
    /// Status bar text.
    pub status: String,
    /// Sticky error shown in red until the next successful action.
    pub error: Option<String>,
}

impl UiState {
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
        if self.log.len() > LOG_CAPACITY {
            let excess = self.log.len() - LOG_CAPACITY;
            self.log.drain(..excess);
        }
    }

    /// Keep `selected` inside a table of `len` rows.
    pub fn clamp_selection(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

/// Human-readable line for the event log.
pub fn event_line(ev: &QueueEvent) -> String {
    match ev {
        QueueEvent::Added { count } => format!("{count} file(s) added to upload queue"),
        QueueEvent::Started { name, .. } => format!("Uploading {name}"),
        QueueEvent::Completed { name, .. } => format!("{name} uploaded successfully"),
        QueueEvent::Failed {
            name,
            error,
            retry_in: Some(delay),
            ..
        } => format!("{name} failed: {error} (retrying in {}s)", delay.as_secs()),
        QueueEvent::Failed { name, error, .. } => format!("{name} failed: {error}"),
        QueueEvent::RetryScheduled { name, delay, .. } => {
            format!("Retrying {name} in {}s", delay.as_secs())
        }
        QueueEvent::RetryLimitReached { name, .. } => {
            format!("{name} has reached maximum retry attempts")
        }
        QueueEvent::RetriedAll { count } => format!("Retrying {count} failed upload(s)"),
        QueueEvent::Removed { name, .. } => format!("Removed {name}"),
        QueueEvent::Cleared { count } => format!("Cleared {count} completed upload(s)"),
        QueueEvent::Paused => "Upload queue paused".into(),
        QueueEvent::Resumed => "Upload queue resumed".into(),
    }
}
