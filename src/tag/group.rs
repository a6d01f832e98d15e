use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use super::cursor::Cursor;
use super::registry::{FilterId, Registry, SortId};
use crate::storage::{StoryArena, StoryKey};

/// A named, ordered, filterable collection of story keys.
///
/// Order is the active sort with ties broken by base rank, so two groups
/// holding the same keys under the same sort always agree.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: Arc<str>,
    items: Vec<StoryKey>,
    members: HashSet<StoryKey>,
    pub filters: Cursor<FilterId>,
    pub sorts: Cursor<SortId>,
    pub collapsed: bool,
}

impl Group {
    pub fn new(name: impl Into<Arc<str>>, filters: Cursor<FilterId>, sorts: Cursor<SortId>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            members: HashSet::new(),
            filters,
            sorts,
            collapsed: false,
        }
    }

    pub fn items(&self) -> &[StoryKey] {
        &self.items
    }

    pub fn contains(&self, key: &StoryKey) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds keys not already present, then re-sorts. Returns the count added.
    pub fn extend<I>(&mut self, keys: I, arena: &StoryArena, registry: &Registry) -> usize
    where
        I: IntoIterator<Item = StoryKey>,
    {
        let mut added = 0;
        for key in keys {
            if self.members.insert(key.clone()) {
                self.items.push(key);
                added += 1;
            }
        }
        if added > 0 {
            self.resort(arena, registry);
        }
        added
    }

    /// Removes the given keys. Absent keys are ignored.
    pub fn retract<'a, I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a StoryKey>,
    {
        let mut gone = HashSet::new();
        for key in keys {
            if self.members.remove(key) {
                gone.insert(key.clone());
            }
        }
        if !gone.is_empty() {
            self.items.retain(|k| !gone.contains(k));
        }
        gone.len()
    }

    /// Keeps only keys in `keep`. Returns the count removed.
    pub fn retain_only(&mut self, keep: &HashSet<StoryKey>) -> usize {
        let before = self.items.len();
        self.items.retain(|k| keep.contains(k));
        self.members.retain(|k| keep.contains(k));
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.members.clear();
    }

    /// Stable sort by the active comparator, then base rank.
    pub fn resort(&mut self, arena: &StoryArena, registry: &Registry) {
        let comparator = registry.comparator(self.sorts.cur());
        self.items.sort_by(|a, b| match (arena.get(a), arena.get(b)) {
            (Some(x), Some(y)) => comparator
                .as_ref()
                .map_or(Ordering::Equal, |cmp| cmp(x, y))
                .then_with(|| x.rank.cmp(&y.rank)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
    }

    pub fn unread_count(&self, arena: &StoryArena) -> usize {
        self.items
            .iter()
            .filter_map(|k| arena.get(k))
            .filter(|s| !s.is_read())
            .count()
    }
}
