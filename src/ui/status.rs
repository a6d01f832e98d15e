use crate::app::App;
use crate::theme::Role;
use ratatui::{layout::Rect, widgets::Paragraph, Frame};
use std::borrow::Cow;

/// Render the status bar
pub fn render(f: &mut Frame, app: &App, area: Rect) {
    // EDGE-001: Guard against zero-width/height areas
    if area.width < 1 || area.height < 1 {
        return;
    }

    let (text, role): (Cow<'_, str>, Role) = if let Some(prompt) = app.prompt() {
        (
            Cow::Owned(format!("{}: {}_", prompt.kind.label(), prompt.input)),
            Role::Status,
        )
    } else if let Some(msg) = app.status() {
        (Cow::Borrowed(msg), Role::Notice)
    } else {
        (Cow::Owned(summary(app)), Role::Status)
    };

    let paragraph = Paragraph::new(text).style(app.palette.style(role));
    f.render_widget(paragraph, area);
}

fn summary(app: &App) -> String {
    let unread: usize = app
        .groups()
        .iter()
        .map(|g| g.unread_count(app.arena()))
        .sum();
    let mut text = format!(
        "Filter: {} | Tags: {} | {} unread",
        app.global_filter_name(),
        app.tagset_label(),
        unread
    );
    let failing = app.failing_sources();
    if failing > 0 {
        text.push_str(&format!(" | {failing} failing"));
    }
    text.push_str(" | ? help");
    text
}
