//! Help overlay listing the live keybindings, overrides included.

use crate::app::App;
use crate::keybindings::{Context, KeybindingRegistry};
use crate::theme::Role;
use ratatui::{
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Clear, Row, Table},
    Frame,
};

const SECTIONS: [(Context, &str); 3] = [
    (Context::Global, "Stories"),
    (Context::Prompt, "Prompt"),
    (Context::Help, "Help"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum HelpLine {
    Section(&'static str),
    Binding(String, &'static str),
    Gap,
}

fn help_lines(keybindings: &KeybindingRegistry) -> Vec<HelpLine> {
    let bindings = keybindings.all_bindings();
    let mut lines = Vec::new();
    for (context, label) in SECTIONS {
        let mut section = bindings
            .iter()
            .filter(|(c, ..)| *c == context)
            .map(|(_, key, _, description)| HelpLine::Binding(key.clone(), *description))
            .peekable();
        if section.peek().is_none() {
            continue;
        }
        if !lines.is_empty() {
            lines.push(HelpLine::Gap);
        }
        lines.push(HelpLine::Section(label));
        lines.extend(section);
    }
    lines
}

pub fn render(f: &mut Frame, app: &App) {
    let area = centered(f.area(), 80, 80);
    if area.width < 20 || area.height < 6 {
        return;
    }
    f.render_widget(Clear, area);

    let lines = help_lines(&app.keybindings);
    // border top/bottom plus the header row
    let page = usize::from(area.height.saturating_sub(3));
    let last = lines.len().saturating_sub(page);
    let scroll = app.help_scroll.min(last);

    let section_style = app.palette.style(Role::Header).add_modifier(Modifier::BOLD);
    let rows: Vec<Row> = lines
        .iter()
        .skip(scroll)
        .take(page)
        .map(|line| match line {
            HelpLine::Section(label) => {
                Row::new(vec![format!("-- {label} --"), String::new()]).style(section_style)
            }
            HelpLine::Binding(key, description) => {
                Row::new(vec![format!("  {key}"), description.to_string()])
            }
            HelpLine::Gap => Row::new(vec![String::new(), String::new()]),
        })
        .collect();

    let title = if last > 0 {
        format!(" Help ({}/{}) ", scroll + 1, last + 1)
    } else {
        " Help (? to close) ".to_string()
    };
    let header = Row::new(vec!["Key", "Action"])
        .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED))
        .bottom_margin(1);

    let table = Table::new(rows, [Constraint::Length(16), Constraint::Min(20)])
        .block(Block::default().borders(Borders::ALL).title(title))
        .header(header)
        .style(app.palette.style(Role::Text));
    f.render_widget(table, area);
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let width = area.width * percent_x / 100;
    let height = area.height * percent_y / 100;
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_in_order_with_gaps() {
        let lines = help_lines(&KeybindingRegistry::new());
        let sections: Vec<&str> = lines
            .iter()
            .filter_map(|l| match l {
                HelpLine::Section(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(sections, vec!["Stories", "Prompt", "Help"]);
        assert_eq!(lines[0], HelpLine::Section("Stories"));
        assert_eq!(lines.iter().filter(|l| **l == HelpLine::Gap).count(), 2);
        assert!(lines.contains(&HelpLine::Binding("j".to_string(), "Next story")));
    }
}
