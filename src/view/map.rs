//! The virtual line map.
//!
//! All visible groups are flattened into one tall virtual column. Each entry
//! records the row it starts on and how many rows it spans; the screen shows
//! `columns` consecutive slices of `height` rows from the current offset.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::storage::{Story, StoryArena, StoryKey};
use crate::tag::Group;

/// Measures how many rows a story occupies at a given column width.
pub trait Measure {
    fn lines(
        &mut self,
        group: &Group,
        story: &Story,
        first: bool,
        collapsed: bool,
        width: usize,
    ) -> usize;
}

impl<M: Measure + ?Sized> Measure for Box<M> {
    fn lines(
        &mut self,
        group: &Group,
        story: &Story,
        first: bool,
        collapsed: bool,
        width: usize,
    ) -> usize {
        (**self).lines(group, story, first, collapsed, width)
    }
}

/// Screen geometry the map is laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    pub columns: usize,
}

impl Geometry {
    pub fn new(width: usize, height: usize, columns: usize) -> Self {
        Self {
            width,
            height,
            columns: columns.max(1),
        }
    }

    pub fn column_width(&self) -> usize {
        self.width / self.columns.max(1)
    }

    pub fn visible_rows(&self) -> usize {
        self.columns.max(1) * self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub group: usize,
    pub group_name: Arc<str>,
    pub story: StoryKey,
    pub row: usize,
    pub lines: usize,
    pub prev: usize,
    pub next: usize,
    pub first_in_group: bool,
}

impl MapEntry {
    pub fn end_row(&self) -> usize {
        self.row + self.lines
    }
}

#[derive(Debug, Clone, Default)]
pub struct LineMap {
    entries: Vec<MapEntry>,
    total_rows: usize,
    max_offset: usize,
}

impl LineMap {
    /// Lays out `groups` in order. A collapsed group contributes only its
    /// first story; stories measuring zero lines are skipped.
    pub fn build(
        groups: &[Group],
        arena: &StoryArena,
        measure: &mut dyn Measure,
        geometry: Geometry,
    ) -> Self {
        let width = geometry.column_width();
        let mut entries: Vec<MapEntry> = Vec::new();
        let mut row = 0;

        for (gi, group) in groups.iter().enumerate() {
            for (si, key) in group.items().iter().enumerate() {
                let first = si == 0;
                if group.collapsed && !first {
                    break;
                }
                let Some(story) = arena.get(key) else {
                    continue;
                };
                let lines = measure.lines(group, story, first, group.collapsed, width);
                if lines == 0 {
                    continue;
                }
                let index = entries.len();
                if let Some(last) = entries.last_mut() {
                    last.next = index;
                }
                entries.push(MapEntry {
                    group: gi,
                    group_name: Arc::clone(&group.name),
                    story: key.clone(),
                    row,
                    lines,
                    prev: index.saturating_sub(1),
                    next: index,
                    first_in_group: first,
                });
                row += lines;
            }
        }

        Self {
            entries,
            total_rows: row,
            max_offset: row.saturating_sub(geometry.visible_rows()),
        }
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&MapEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn max_offset(&self) -> usize {
        self.max_offset
    }

    pub fn find(&self, group_name: &str, story: &StoryKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &*e.group_name == group_name && &e.story == story)
    }

    /// First entry belonging to any group at index `group` or later.
    pub fn first_from_group(&self, group: usize) -> Option<usize> {
        self.entries.iter().position(|e| e.group >= group)
    }

    pub fn first_of_group(&self, group: usize) -> Option<usize> {
        self.entries.iter().position(|e| e.group == group)
    }

    /// Index of the entry covering `row`, if any.
    pub fn entry_at_row(&self, row: usize) -> Option<usize> {
        let i = self.entries.partition_point(|e| e.end_row() <= row);
        self.entries.get(i).filter(|e| e.row <= row).map(|_| i)
    }

    /// Indices of entries intersecting rows `[start, start + rows)`.
    pub fn window(&self, start: usize, rows: usize) -> std::ops::Range<usize> {
        let end = start.saturating_add(rows);
        let lo = self.entries.partition_point(|e| e.end_row() <= start);
        let hi = self.entries.partition_point(|e| e.row < end);
        lo..hi.max(lo)
    }
}

// ============================================================================
// Line Count Cache
// ============================================================================

const DEFAULT_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    story: StoryKey,
    revision: u64,
    width: usize,
    first: bool,
    collapsed: bool,
}

/// LRU of measured line counts so unchanged stories are not re-measured on
/// every rebuild.
#[derive(Debug)]
pub struct LineCache {
    cache: LruCache<CacheKey, usize>,
    hits: u64,
    misses: u64,
}

impl Default for LineCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl LineCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Wraps `inner` so measurements go through this cache.
    pub fn wrap<'a, M: Measure>(&'a mut self, inner: &'a mut M) -> Cached<'a, M> {
        Cached { cache: self, inner }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

pub struct Cached<'a, M> {
    cache: &'a mut LineCache,
    inner: &'a mut M,
}

impl<M: Measure> Measure for Cached<'_, M> {
    fn lines(
        &mut self,
        group: &Group,
        story: &Story,
        first: bool,
        collapsed: bool,
        width: usize,
    ) -> usize {
        let key = CacheKey {
            story: story.key.clone(),
            revision: story.revision,
            width,
            first,
            collapsed,
        };
        if let Some(&lines) = self.cache.cache.get(&key) {
            self.cache.hits += 1;
            return lines;
        }
        self.cache.misses += 1;
        let lines = self.inner.lines(group, story, first, collapsed, width);
        self.cache.cache.put(key, lines);
        lines
    }
}
