//! Cursor over the line map.
//!
//! Navigation only follows the map's prev/next links. Every operation that
//! moves the cursor emits one `Deselect` for the old story and one `Select`
//! for the new one; crossing into another group also raises the force-redraw
//! flag so the dispatcher repaints everything.

use std::sync::Arc;

use super::hooks::{HookEvent, HookSink};
use super::map::{Geometry, LineMap, MapEntry};
use crate::storage::StoryKey;

/// Identity of the selected story, independent of any particular map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub group: usize,
    pub group_name: Arc<str>,
    pub story: StoryKey,
}

impl Anchor {
    fn of(entry: &MapEntry) -> Self {
        Self {
            group: entry.group,
            group_name: Arc::clone(&entry.group_name),
            story: entry.story.clone(),
        }
    }

    fn same_story(&self, other: &Anchor) -> bool {
        self.group_name == other.group_name && self.story == other.story
    }
}

#[derive(Debug, Default, Clone)]
pub struct Selection {
    current: Option<usize>,
    offset: usize,
    force_redraw: bool,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn entry<'m>(&self, map: &'m LineMap) -> Option<&'m MapEntry> {
        self.current.and_then(|i| map.get(i))
    }

    pub fn anchor(&self, map: &LineMap) -> Option<Anchor> {
        self.entry(map).map(Anchor::of)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Drops the selection without hooks. Used when the whole group set is
    /// replaced.
    pub fn clear(&mut self) {
        self.current = None;
        self.offset = 0;
    }

    pub fn take_force_redraw(&mut self) -> bool {
        std::mem::take(&mut self.force_redraw)
    }

    fn transition(
        &mut self,
        old: Option<Anchor>,
        map: &LineMap,
        new: Option<usize>,
        hooks: &mut dyn HookSink,
    ) -> bool {
        self.current = new;
        let new = self.anchor(map);
        match (&old, &new) {
            (Some(o), Some(n)) if o.same_story(n) => return false,
            (None, None) => return false,
            _ => {}
        }
        if let Some(o) = &old {
            hooks.emit(HookEvent::Deselect {
                group: Arc::clone(&o.group_name),
                story: o.story.clone(),
            });
        }
        if let Some(n) = &new {
            hooks.emit(HookEvent::Select {
                group: Arc::clone(&n.group_name),
                story: n.story.clone(),
            });
        }
        if let (Some(o), Some(n)) = (&old, &new) {
            if o.group_name != n.group_name {
                self.force_redraw = true;
            }
        }
        true
    }

    fn move_to(&mut self, map: &LineMap, index: usize, hooks: &mut dyn HookSink) -> bool {
        let old = self.anchor(map);
        self.transition(old, map, Some(index), hooks)
    }

    /// Current index, or `None` after emitting `NoItems`. With items but no
    /// selection, the first entry is selected and the operation goes on from
    /// there; the flag reports that this happened.
    fn require(&mut self, map: &LineMap, hooks: &mut dyn HookSink) -> Option<(usize, bool)> {
        if map.is_empty() {
            hooks.emit(HookEvent::NoItems);
            return None;
        }
        match self.current.filter(|&i| i < map.len()) {
            Some(i) => Some((i, false)),
            None => {
                self.current = None;
                let fresh = self.transition(None, map, Some(0), hooks);
                Some((0, fresh))
            }
        }
    }

    pub fn next_item(&mut self, map: &LineMap, hooks: &mut dyn HookSink) -> bool {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        self.move_to(map, map.entries()[cur].next, hooks) || fresh
    }

    pub fn prev_item(&mut self, map: &LineMap, hooks: &mut dyn HookSink) -> bool {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        self.move_to(map, map.entries()[cur].prev, hooks) || fresh
    }

    /// Advances to the first entry of the next group and scrolls so the
    /// group starts at the top of the screen where possible.
    pub fn next_group(&mut self, map: &LineMap, hooks: &mut dyn HookSink) -> bool {
        let Some((start, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let entries = map.entries();
        let group = entries[start].group;
        let mut i = start;
        while entries[i].next != i && entries[i].group == group {
            i = entries[i].next;
        }
        let changed = self.move_to(map, i, hooks);
        self.offset = entries[i].row.min(map.max_offset());
        changed || fresh
    }

    /// Walks back to the first story of the previous group.
    pub fn prev_group(&mut self, map: &LineMap, hooks: &mut dyn HookSink) -> bool {
        let Some((start, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let entries = map.entries();
        let group = entries[start].group;
        let mut i = start;
        while entries[i].prev != i {
            if entries[i].group != group && entries[i].first_in_group {
                break;
            }
            i = entries[i].prev;
        }
        self.move_to(map, i, hooks) || fresh
    }

    /// Jumps to group `n` of `group_count`; negative counts from the end.
    pub fn goto_group(
        &mut self,
        map: &LineMap,
        group_count: usize,
        n: i64,
        hooks: &mut dyn HookSink,
    ) -> bool {
        let Some((_, fresh)) = self.require(map, hooks) else {
            return false;
        };
        if group_count == 0 {
            return fresh;
        }
        let count = i64::try_from(group_count).unwrap_or(i64::MAX);
        let target = if n < 0 { count + n } else { n };
        let target = target.clamp(0, count - 1) as usize;
        match map.first_of_group(target) {
            Some(i) => self.move_to(map, i, hooks) || fresh,
            None => {
                hooks.emit(HookEvent::Notice(format!("Group {target} not visible")));
                fresh
            }
        }
    }

    /// Moves `n` groups from the current one, clamped to the group range.
    pub fn goto_relative_group(
        &mut self,
        map: &LineMap,
        group_count: usize,
        n: i64,
        hooks: &mut dyn HookSink,
    ) -> bool {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        if group_count == 0 {
            return fresh;
        }
        let current = i64::try_from(map.entries()[cur].group).unwrap_or(i64::MAX);
        let last = i64::try_from(group_count - 1).unwrap_or(i64::MAX);
        let target = current.saturating_add(n).clamp(0, last) as usize;
        match map.first_of_group(target) {
            Some(i) => self.move_to(map, i, hooks) || fresh,
            None => fresh,
        }
    }

    /// Selects the next entry matching `f`. Stops at the end of the map.
    pub fn next_filtered<F>(&mut self, map: &LineMap, hooks: &mut dyn HookSink, mut f: F) -> bool
    where
        F: FnMut(&MapEntry) -> bool,
    {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let entries = map.entries();
        let mut i = entries[cur].next;
        loop {
            if f(&entries[i]) {
                return self.move_to(map, i, hooks) || fresh;
            }
            if entries[i].next == i {
                return fresh;
            }
            i = entries[i].next;
        }
    }

    /// Selects the previous entry matching `f`. Stops at the start of the map.
    pub fn prev_filtered<F>(&mut self, map: &LineMap, hooks: &mut dyn HookSink, mut f: F) -> bool
    where
        F: FnMut(&MapEntry) -> bool,
    {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let entries = map.entries();
        let mut i = entries[cur].prev;
        loop {
            if f(&entries[i]) {
                return self.move_to(map, i, hooks) || fresh;
            }
            if entries[i].prev == i {
                return fresh;
            }
            i = entries[i].prev;
        }
    }

    /// Selects the first visible entry of group `group` or any later group,
    /// falling back to the top of the map. `None` means the current group.
    pub fn select_top_of_group(
        &mut self,
        map: &LineMap,
        group: Option<usize>,
        hooks: &mut dyn HookSink,
    ) -> bool {
        let old = self.anchor(map);
        let group = group.or(old.as_ref().map(|a| a.group)).unwrap_or(0);
        self.select_top(map, old, group, hooks)
    }

    fn select_top(
        &mut self,
        map: &LineMap,
        old: Option<Anchor>,
        group: usize,
        hooks: &mut dyn HookSink,
    ) -> bool {
        if map.is_empty() {
            hooks.emit(HookEvent::NoItems);
            return false;
        }
        let index = map.first_from_group(group).unwrap_or(0);
        self.transition(old, map, Some(index), hooks)
    }

    /// Restores the selection on a freshly built map.
    ///
    /// The same (group, story) pair is kept when still mapped. Otherwise the
    /// top of the previously selected group is taken, or the top of group 0
    /// when nothing was selected. An empty map clears the selection.
    pub fn reanchor(&mut self, map: &LineMap, anchor: Option<Anchor>, hooks: &mut dyn HookSink) {
        if map.is_empty() {
            self.current = None;
            self.offset = 0;
            if let Some(old) = anchor {
                hooks.emit(HookEvent::NoItems);
                self.transition(Some(old), map, None, hooks);
            }
            return;
        }
        match anchor {
            Some(old) => match map.find(&old.group_name, &old.story) {
                Some(i) => {
                    self.current = Some(i);
                }
                None => {
                    let group = old.group;
                    self.select_top(map, Some(old), group, hooks);
                }
            },
            None => {
                self.select_top(map, None, 0, hooks);
            }
        }
        self.offset = self.offset.min(map.max_offset());
    }

    pub fn page_down(&mut self, map: &LineMap, geometry: Geometry, hooks: &mut dyn HookSink) -> bool {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let page = geometry.visible_rows().max(1);
        let target = map.entries()[cur].row + page;
        let index = map.entry_at_row(target).unwrap_or(map.len() - 1);
        self.offset = (self.offset + page).min(map.max_offset());
        self.move_to(map, index, hooks) || fresh
    }

    pub fn page_up(&mut self, map: &LineMap, geometry: Geometry, hooks: &mut dyn HookSink) -> bool {
        let Some((cur, fresh)) = self.require(map, hooks) else {
            return false;
        };
        let page = geometry.visible_rows().max(1);
        let target = map.entries()[cur].row.saturating_sub(page);
        let index = map.entry_at_row(target).unwrap_or(0);
        self.offset = self.offset.saturating_sub(page);
        self.move_to(map, index, hooks) || fresh
    }

    /// Adjusts the scroll offset so the selected entry is fully on screen.
    /// Returns true if the offset moved.
    pub fn keep_visible(&mut self, map: &LineMap, geometry: Geometry) -> bool {
        let before = self.offset;
        self.offset = self.offset.min(map.max_offset());
        if let Some(entry) = self.entry(map) {
            let rows = geometry.visible_rows();
            if entry.row < self.offset {
                self.offset = entry.row;
            } else if entry.end_row() > self.offset + rows {
                self.offset = entry.end_row().saturating_sub(rows);
            }
        }
        self.offset != before
    }
}
