//! Story layout, shared by line measurement and drawing so the two never
//! disagree about how many rows a story takes.

use crate::storage::Story;
use crate::tag::Group;
use crate::util::wrap_to_width;
use crate::view::Measure;

/// Columns reserved in front of every title row.
pub const INDENT: usize = 2;

/// One screen row of a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryRow {
    /// The group header above a group's first story. Its text carries a live
    /// unread count, so it is filled in at draw time.
    Header,
    Title(String),
}

/// Rows for `story` at column `width`.
///
/// The first story of a group is preceded by the group header. A collapsed
/// group shows its header only.
pub fn layout(story: &Story, first: bool, collapsed: bool, width: usize) -> Vec<StoryRow> {
    let mut rows = Vec::new();
    if first {
        rows.push(StoryRow::Header);
    }
    if collapsed {
        return rows;
    }
    let text_width = width.saturating_sub(INDENT).max(1);
    rows.extend(
        wrap_to_width(&story.title, text_width)
            .into_iter()
            .map(StoryRow::Title),
    );
    rows
}

/// Measures stories by laying them out.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoryRenderer;

impl Measure for StoryRenderer {
    fn lines(
        &mut self,
        _group: &Group,
        story: &Story,
        first: bool,
        collapsed: bool,
        width: usize,
    ) -> usize {
        layout(story, first, collapsed, width).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Entry;
    use crate::tag::{Cursor, FilterId, SortId};
    use pretty_assertions::assert_eq;

    fn story(title: &str) -> Story {
        Story::from_entry(
            0,
            0,
            &Entry {
                id: "s".to_string(),
                title: title.to_string(),
                link: None,
                summary: None,
                published: None,
                state: Vec::new(),
            },
        )
    }

    fn title(s: &str) -> StoryRow {
        StoryRow::Title(s.to_string())
    }

    #[test]
    fn test_first_story_gets_header() {
        let rows = layout(&story("hello world"), true, false, 40);
        assert_eq!(rows, vec![StoryRow::Header, title("hello world")]);
    }

    #[test]
    fn test_titles_wrap_inside_indent() {
        let rows = layout(&story("the quick brown fox"), false, false, 11);
        assert_eq!(rows, vec![title("the quick"), title("brown fox")]);
    }

    #[test]
    fn test_collapsed_group_shows_header_only() {
        assert_eq!(layout(&story("x"), true, true, 40), vec![StoryRow::Header]);
        assert!(layout(&story("x"), false, true, 40).is_empty());
    }

    #[test]
    fn test_measure_matches_layout() {
        let group = Group::new("g", Cursor::single(FilterId(0)), Cursor::single(SortId(0)));
        let s = story("a b c d e f");
        let mut renderer = StoryRenderer;
        assert_eq!(renderer.lines(&group, &s, true, false, 5), 4);
        assert_eq!(renderer.lines(&group, &s, false, true, 5), 0);
    }
}
