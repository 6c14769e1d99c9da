//! Screen region helpers.

use ratatui::prelude::*;

/// Vertical bands of the queue view.
pub struct MainLayout {
    pub stats_bar: Rect,
    /// Queue table + info panel.
    pub body: Rect,
    pub help_bar: Rect,
    pub status_bar: Rect,
}

/// Horizontal split of the body.
pub struct BodyLayout {
    pub queue_table: Rect,
    pub info_panel: Rect,
}

pub fn create_main_layout(area: Rect) -> MainLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // stats
            Constraint::Min(1),
            Constraint::Length(3), // help
            Constraint::Length(3), // status
        ])
        .split(area);

    MainLayout {
        stats_bar: chunks[0],
        body: chunks[1],
        help_bar: chunks[2],
        status_bar: chunks[3],
    }
}

/// Queue table 65%, info panel 35%.
pub fn create_body_layout(area: Rect) -> BodyLayout {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    BodyLayout {
        queue_table: chunks[0],
        info_panel: chunks[1],
    }
}
