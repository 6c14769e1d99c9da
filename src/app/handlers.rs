//! Key handling.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::{
    input::{InputBoxState, InputCallbackId},
    jobs::JobStatus,
    queue::RetryOutcome,
    shortcuts::matches_shortcut,
    transfer::download_url,
};

use super::{App, enqueue_path, normalize_input_path};

/// Handle one key press. Returns `true` when the app should exit.
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }
    handle_queue_key(app, k).await
}

pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

async fn handle_queue_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.queue;

    if matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if matches_shortcut(&k, &sc.add) {
        app.input_box = Some(InputBoxState::new(
            "File or folder to upload:",
            "",
            InputCallbackId::AddPath,
        ));
    } else if matches_shortcut(&k, &sc.retry) {
        retry_selected(app).await?;
    } else if matches_shortcut(&k, &sc.retry_all) {
        let n = app.queue.retry_all_failed().await?;
        app.ui.status = if n == 0 {
            "No failed uploads to retry".into()
        } else {
            format!("Retrying {n} failed upload(s)")
        };
    } else if matches_shortcut(&k, &sc.remove) {
        if let Some(job) = app.selected_job() {
            let (id, name) = (job.id, job.name().to_string());
            if app.queue.remove_file(id).await? {
                app.ui.status = format!("Removed {name}");
            }
        }
    } else if matches_shortcut(&k, &sc.clear_completed) {
        let n = app.queue.clear_completed().await?;
        app.ui.status = format!("Cleared {n} completed upload(s)");
    } else if matches_shortcut(&k, &sc.toggle_pause) {
        let paused = app.queue.toggle_pause().await?;
        app.ui.status = if paused { "Paused" } else { "Resumed" }.into();
    } else if matches_shortcut(&k, &sc.open) {
        open_selected(app);
    } else if matches_shortcut(&k, &sc.down) {
        if app.ui.selected + 1 < app.snapshot.jobs.len() {
            app.ui.selected += 1;
        }
    } else if matches_shortcut(&k, &sc.up) {
        app.ui.selected = app.ui.selected.saturating_sub(1);
    }

    Ok(false)
}

async fn retry_selected(app: &mut App) -> Result<()> {
    let Some(job) = app.selected_job() else {
        return Ok(());
    };
    let (id, name) = (job.id, job.name().to_string());

    match app.queue.retry_file(id).await? {
        RetryOutcome::Scheduled { delay } => {
            app.ui.error = None;
            app.ui.status = format!("Retrying {name} in {}s", delay.as_secs());
        }
        RetryOutcome::LimitReached => {
            app.ui.error = Some(format!("{name} has reached maximum retry attempts"));
        }
        RetryOutcome::NotRetryable => {
            app.ui.status = "Only failed uploads can be retried".into();
        }
        RetryOutcome::NotFound => {}
    }
    Ok(())
}

/// Open the download link of the selected completed upload.
fn open_selected(app: &mut App) {
    let Some(job) = app.selected_job() else {
        return;
    };
    let Some(result_id) = job.result_id.as_deref().filter(|_| job.status == JobStatus::Completed)
    else {
        app.ui.status = "Only completed uploads can be opened".into();
        return;
    };
    let url = download_url(&app.cfg.server.base_url, result_id);
    match webbrowser::open(&url) {
        Ok(()) => app.ui.status = format!("Opened {url}"),
        Err(e) => {
            tracing::warn!("failed to open {url}: {e}");
            app.ui.error = Some(format!("Cannot open browser: {e}"));
        }
    }
}

async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let Some(input) = &mut app.input_box else {
        return Ok(false);
    };
    let sc = &app.shortcuts.input_box;

    if is_ctrl_c(&k) {
        return Ok(true);
    }

    if matches_shortcut(&k, &sc.confirm) {
        let value = std::mem::take(&mut input.value);
        let callback_id = input.callback_id.clone();
        app.input_box = None;
        apply_input_callback(app, callback_id, value).await?;
    } else if matches_shortcut(&k, &sc.cancel) {
        app.input_box = None;
    } else if matches_shortcut(&k, &sc.backspace) {
        input.backspace();
    } else if matches_shortcut(&k, &sc.delete) {
        input.delete();
    } else if matches_shortcut(&k, &sc.left) {
        input.move_left();
    } else if matches_shortcut(&k, &sc.right) {
        input.move_right();
    } else if matches_shortcut(&k, &sc.home) {
        input.move_home();
    } else if matches_shortcut(&k, &sc.end) {
        input.move_end();
    } else if matches_shortcut(&k, &sc.clear_line) {
        input.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.contains(KeyModifiers::CONTROL)
    {
        input.insert_char(c);
    }

    Ok(false)
}

async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::AddPath => match normalize_input_path(&value) {
            Some(path) => enqueue_path(app, &path).await?,
            None => app.ui.status = "No path entered".into(),
        },
    }
    Ok(())
}
