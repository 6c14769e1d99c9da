//! TUI event loop and app state.

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{mpsc, watch};

use crate::{
    config::Config,
    events::{UiState, event_line},
    input::InputBoxState,
    jobs::{Job, collect_payloads},
    queue::{QueueEvent, QueueSnapshot, UploadQueue},
    shortcuts::Shortcuts,
    transfer::{HttpTransfer, Transfer},
    ui::Tui,
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// State shared by input handling and drawing.
pub struct App {
    pub cfg: Config,
    pub ui: UiState,
    /// Handle used to issue queue operations.
    pub queue: UploadQueue,
    /// Last queue state seen by the UI; refreshed once per frame.
    pub snapshot: QueueSnapshot,
    pub state_rx: watch::Receiver<QueueSnapshot>,
    pub events_rx: mpsc::Receiver<QueueEvent>,
    /// Open popup, if any. Takes all keys while open.
    pub input_box: Option<InputBoxState>,
    pub shortcuts: Shortcuts,
}

impl App {
    /// Start the queue on `transfer` and build the initial UI state.
    pub fn new(cfg: Config, shortcuts: Shortcuts, transfer: Arc<dyn Transfer>) -> Self {
        let (queue, events_rx) = UploadQueue::spawn(cfg.queue_options(), transfer);
        Self {
            ui: UiState {
                status: format!("Ready ({})", cfg.server.base_url),
                ..UiState::default()
            },
            cfg,
            state_rx: queue.subscribe(),
            snapshot: queue.snapshot(),
            queue,
            events_rx,
            input_box: None,
            shortcuts,
        }
    }

    /// Job under the table cursor.
    pub fn selected_job(&self) -> Option<&Job> {
        self.snapshot.jobs.get(self.ui.selected)
    }

    /// Pull the latest snapshot if the queue published a new one.
    fn sync_snapshot(&mut self) {
        if self.state_rx.has_changed().unwrap_or(false) {
            self.snapshot = self.state_rx.borrow_and_update().clone();
            self.ui.clamp_selection(self.snapshot.jobs.len());
        }
    }

    fn drain_events(&mut self) {
        while let Ok(ev) = self.events_rx.try_recv() {
            self.ui.push_log(event_line(&ev));
        }
    }
}

/// Run the TUI until the user quits. `initial` paths are enqueued on start.
pub async fn run_app(terminal: &mut Tui, cfg: Config, initial: Vec<PathBuf>) -> Result<()> {
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    let transfer = HttpTransfer::new(cfg.server.base_url.clone(), cfg.timeout())?;
    tracing::info!("uploading to {}", cfg.server.base_url);
    let mut app = App::new(cfg, shortcuts, Arc::new(transfer));

    for path in initial {
        enqueue_path(&mut app, &path).await?;
    }

    loop {
        app.sync_snapshot();
        app.drain_events();
        terminal.draw(|f| draw(f, &app))?;

        // Short poll keeps progress bars moving while idle.
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }
    Ok(())
}

/// Validate a file (or every file in a directory) and add the accepted ones.
pub async fn enqueue_path(app: &mut App, path: &Path) -> Result<()> {
    let (payloads, rejected) = collect_payloads(path, &app.cfg.limits).await;

    for err in &rejected {
        tracing::warn!("rejected: {err}");
        app.ui.push_log(format!("Rejected: {err}"));
    }
    app.ui.error = rejected.last().map(|e| e.to_string());

    if payloads.is_empty() {
        if rejected.is_empty() {
            app.ui.status = format!("No files found in {}", path.display());
        }
        return Ok(());
    }
    let ids = app.queue.add_files(payloads).await?;
    app.ui.status = format!("Queued {} file(s)", ids.len());
    Ok(())
}

/// Tidy a typed or pasted path: trim, drop surrounding quotes, expand `~/`.
pub fn normalize_input_path(raw: &str) -> Option<PathBuf> {
    let s = raw.trim();
    let s = s
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return Some(PathBuf::from(home).join(rest));
    }
    Some(PathBuf::from(s))
}
