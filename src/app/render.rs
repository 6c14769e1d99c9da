//! Drawing.

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    input,
    jobs::{Job, JobStatus, format_file_size},
    layout,
    queue::Stats,
    shortcuts::{Shortcuts, format_keys},
    transfer::download_url,
};

use super::App;

const BAR_WIDTH: usize = 12;

pub fn draw(f: &mut Frame, app: &App) {
    let main = layout::create_main_layout(f.area());
    let body = layout::create_body_layout(main.body);

    f.render_widget(
        stats_bar(&app.snapshot.stats, app.snapshot.paused),
        main.stats_bar,
    );

    let max_retries = app.cfg.queue.max_retry_attempts;
    let rows = app
        .snapshot
        .jobs
        .iter()
        .enumerate()
        .map(|(i, j)| job_row(i, j, max_retries));
    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(10),
            Constraint::Length(9),
            Constraint::Length(BAR_WIDTH as u16 + 6),
            Constraint::Length(7),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("QUEUE"))
    .header(Row::new(vec!["#", "file", "size", "status", "progress", "retries"]).bold())
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0))
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    let mut table_state = TableState::default();
    if !app.snapshot.jobs.is_empty() {
        table_state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, body.queue_table, &mut table_state);

    let info = Paragraph::new(info_text(app))
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info, body.info_panel);

    let help = Paragraph::new(help_text(&app.shortcuts))
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help, main.help_bar);

    f.render_widget(status_bar(app), main.status_bar);

    if let Some(input_state) = &app.input_box {
        input::render_input_box(f, input_state);
    }
}

fn stats_bar(stats: &Stats, paused: bool) -> Paragraph<'static> {
    let mut spans = vec![
        Span::raw(format!("Total: {}  ", stats.total)),
        Span::styled(
            format!("Uploading: {}  ", stats.uploading),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(
            format!("Completed: {}  ", stats.completed),
            Style::default().fg(Color::Green),
        ),
        Span::styled(
            format!("Failed: {}  ", stats.failed),
            Style::default().fg(Color::Red),
        ),
        Span::raw(format!("Queued: {}", stats.queued)),
    ];
    if paused {
        spans.push(Span::styled(
            "  [PAUSED]",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ));
    }
    Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title("STATS"))
}

fn job_row(i: usize, j: &Job, max_retries: u32) -> Row<'static> {
    Row::new(vec![
        Cell::from(format!("{}", i + 1)),
        Cell::from(j.name().to_string()),
        Cell::from(format_file_size(j.payload.size)),
        Cell::from(j.status.label()).style(Style::default().fg(status_color(j.status))),
        Cell::from(progress_bar(j.progress, BAR_WIDTH)),
        Cell::from(format!("{}/{}", j.retry_count, max_retries)),
    ])
}

fn status_color(s: JobStatus) -> Color {
    match s {
        JobStatus::Queued => Color::Gray,
        JobStatus::Uploading => Color::Cyan,
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
        JobStatus::Retrying => Color::Yellow,
    }
}

/// `████░░░░ 50%` style bar.
fn progress_bar(percent: u8, width: usize) -> String {
    let filled = usize::from(percent.min(100)) * width / 100;
    format!(
        "{}{} {:>3}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        percent
    )
}

fn info_text(app: &App) -> String {
    let mut lines = vec![];
    match app.selected_job() {
        Some(j) => {
            lines.push(format!("File: {}", j.name()));
            lines.push(format!("Path: {}", j.payload.path.display()));
            lines.push(format!(
                "Type: {} ({})",
                j.payload.content_type,
                format_file_size(j.payload.size)
            ));
            lines.push(format!("Status: {} {}%", j.status.label(), j.progress));
            lines.push(format!("Added: {}", j.added_at.format("%Y-%m-%d %H:%M:%S")));
            if let Some(err) = &j.error {
                lines.push(format!("Error: {err}"));
            }
            if let Some(rid) = &j.result_id {
                lines.push(format!("Remote id: {rid}"));
                lines.push(format!(
                    "Download: {}",
                    download_url(&app.cfg.server.base_url, rid)
                ));
            }
        }
        None => lines.push("No files queued. Press a to add.".into()),
    }
    lines.push(String::new());
    lines.push("Log:".into());
    let recent = app.ui.log.len().saturating_sub(10);
    lines.extend(app.ui.log[recent..].iter().cloned());
    lines.join("\n")
}

fn help_text(sc: &Shortcuts) -> String {
    let q = &sc.queue;
    format!(
        "{}: add | {}: retry | {}: retry failed | {}: remove | {}: clear done | {}: pause | {}: open | {}/{}: move | {}: quit",
        format_keys(&q.add),
        format_keys(&q.retry),
        format_keys(&q.retry_all),
        format_keys(&q.remove),
        format_keys(&q.clear_completed),
        format_keys(&q.toggle_pause),
        format_keys(&q.open),
        format_keys(&q.up),
        format_keys(&q.down),
        format_keys(&q.quit),
    )
}

fn status_bar(app: &App) -> Paragraph<'static> {
    let pending = app.snapshot.stats.pending();
    let text = match &app.ui.error {
        Some(err) => format!("{} pending | ERROR: {err}", pending),
        None => format!("{} pending | {}", pending, app.ui.status),
    };
    let mut bar = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    if app.ui.error.is_some() {
        bar = bar.style(Style::default().fg(Color::Red));
    }
    bar
}
