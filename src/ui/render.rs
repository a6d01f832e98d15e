//! Render functions for the TUI.
//!
//! The story list is one long run of rows cut into `columns` side-by-side
//! columns, each as tall as the screen minus the status bar.

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::Line,
    widgets::Paragraph,
    Frame,
};

use super::story::{layout, StoryRow, INDENT};
use super::{help, status};
use crate::app::App;
use crate::storage::Story;
use crate::tag::Group;
use crate::theme::Role;
use crate::util::truncate_to_width;

/// Minimum terminal dimensions required for normal operation.
pub(super) const MIN_WIDTH: u16 = 20;
pub(super) const MIN_HEIGHT: u16 = 3;

/// Main render function.
pub(super) fn render(f: &mut Frame, app: &App) {
    let area = f.area();

    // EDGE-001: Guard against zero-width/height to prevent panics
    if area.width < 1 || area.height < 1 {
        return;
    }

    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        let msg = Paragraph::new("Too small").alignment(Alignment::Center);
        f.render_widget(msg, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    render_stories(f, app, chunks[0]);
    status::render(f, app, chunks[1]);

    if app.show_help {
        help::render(f, app);
    }
}

fn render_stories(f: &mut Frame, app: &App, area: Rect) {
    let columns = column_rows(app);
    if columns.is_empty() {
        return;
    }
    let count = u32::try_from(columns.len()).unwrap_or(1);
    let rects = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![Constraint::Ratio(1, count); columns.len()])
        .split(area);

    let base = app.palette.style(Role::Text);
    for (rows, rect) in columns.into_iter().zip(rects.iter()) {
        f.render_widget(Paragraph::new(rows).style(base), *rect);
    }
}

/// Places every visible row into its column and line slot.
pub(super) fn column_rows(app: &App) -> Vec<Vec<Line<'static>>> {
    let geometry = app.geometry();
    let height = geometry.height.max(1);
    let width = geometry.column_width();
    let mut columns = vec![vec![Line::default(); height]; geometry.columns];

    let map = app.map();
    let offset = app.selection().offset();
    let selected = app.selection().current();

    for index in map.window(offset, geometry.visible_rows()) {
        let entry = &map.entries()[index];
        let (Some(story), Some(group)) = (app.arena().get(&entry.story), app.groups().get(entry.group))
        else {
            continue;
        };
        let is_selected = selected == Some(index);
        let rows = layout(story, entry.first_in_group, group.collapsed, width);
        for (k, row) in rows.into_iter().enumerate() {
            let Some(rel) = (entry.row + k).checked_sub(offset) else {
                continue;
            };
            let column = rel / height;
            if column >= geometry.columns {
                break;
            }
            columns[column][rel % height] = styled_row(app, group, story, row, is_selected, width);
        }
    }
    columns
}

fn styled_row(
    app: &App,
    group: &Group,
    story: &Story,
    row: StoryRow,
    selected: bool,
    width: usize,
) -> Line<'static> {
    let palette = &app.palette;
    match row {
        StoryRow::Header => {
            let text = format!("{} [{}]", group.name, group.unread_count(app.arena()));
            let role = if selected && group.collapsed {
                Role::Selected
            } else {
                Role::Header
            };
            Line::styled(truncate_to_width(&text, width).into_owned(), palette.style(role))
        }
        StoryRow::Title(title) => {
            let role = if selected {
                Role::Selected
            } else if story.is_marked() {
                Role::Marked
            } else if story.is_read() {
                Role::Read
            } else {
                Role::Unread
            };
            let text = format!("{}{title}", " ".repeat(INDENT));
            Line::styled(truncate_to_width(&text, width).into_owned(), palette.style(role))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Settings};
    use crate::storage::Entry;
    use crate::tag::Registry;
    use crate::ui::StoryRenderer;
    use crate::view::{CursorStamp, DiffBatch, GroupAdditions};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Arc;

    fn text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_rows_flow_into_columns() {
        let registry = Arc::new(Registry::with_builtins());
        let config = Config::parse(
            "columns = 2\n[[feeds]]\nurl = \"https://example.com/feed\"\n",
        )
        .unwrap();
        let settings = Settings::from_config(&config, &registry, Path::new("/data")).unwrap();
        let mut app = App::new(&settings, registry, Box::new(StoryRenderer));
        app.discover_groups(vec![Arc::from("A")]);
        app.resize(20, 2);

        let stories = ["one", "two", "three"]
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Story::from_entry(
                    0,
                    i,
                    &Entry {
                        id: t.to_string(),
                        title: t.to_string(),
                        link: None,
                        summary: None,
                        published: None,
                        state: Vec::new(),
                    },
                )
            })
            .collect();
        let group = &app.groups()[0];
        let batch = DiffBatch {
            added: vec![GroupAdditions {
                group: Arc::clone(&group.name),
                stamp: CursorStamp::current(group, app.view_state().global_filter, app.epoch()),
                stories,
                complete: true,
            }],
            removed: Vec::new(),
        };
        app.integrate(batch);

        let columns: Vec<Vec<String>> = column_rows(&app)
            .iter()
            .map(|c| c.iter().map(text).collect())
            .collect();
        assert_eq!(
            columns,
            vec![
                vec!["A [3]".to_string(), "  one".to_string()],
                vec!["  two".to_string(), "  three".to_string()],
            ]
        );
    }
}
