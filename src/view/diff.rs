//! Change batches from the feed worker and their validated application.

use std::collections::HashSet;
use std::sync::Arc;

use crate::storage::{Story, StoryArena, StoryKey};
use crate::tag::{FilterId, Group, Registry, SortId};

/// The filter/sort configuration a diff was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorStamp {
    pub global_filter: FilterId,
    pub group_filter: FilterId,
    pub sort: SortId,
    /// Bumped by the foreground whenever it clears groups wholesale.
    pub epoch: u64,
}

impl CursorStamp {
    /// Stamp describing `group` under the foreground's current state.
    pub fn current(group: &Group, global_filter: FilterId, epoch: u64) -> Self {
        Self {
            global_filter,
            group_filter: group.filters.cur(),
            sort: group.sorts.cur(),
            epoch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupAdditions {
    pub group: Arc<str>,
    pub stamp: CursorStamp,
    pub stories: Vec<Story>,
    /// The stories listed are the whole membership; anything else goes.
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct GroupRemovals {
    pub group: Arc<str>,
    pub stamp: CursorStamp,
    pub keys: Vec<StoryKey>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffBatch {
    pub added: Vec<GroupAdditions>,
    pub removed: Vec<GroupRemovals>,
}

impl DiffBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub discarded: usize,
    pub added: usize,
    pub removed: usize,
}

fn accept<'g>(
    groups: &'g mut [Group],
    name: &str,
    stamp: &CursorStamp,
    global_filter: FilterId,
    epoch: u64,
) -> Option<&'g mut Group> {
    let group = groups.iter_mut().find(|g| &*g.name == name)?;
    if CursorStamp::current(group, global_filter, epoch) == *stamp {
        Some(group)
    } else {
        None
    }
}

/// Applies every entry of `batch` whose stamp matches the current state.
///
/// Entries for unknown groups or with a mismatched stamp are dropped. The
/// caller rebuilds the map once afterwards.
pub fn apply_batch(
    batch: DiffBatch,
    groups: &mut [Group],
    arena: &mut StoryArena,
    registry: &Registry,
    global_filter: FilterId,
    epoch: u64,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for diff in batch.added {
        let Some(group) = accept(groups, &diff.group, &diff.stamp, global_filter, epoch) else {
            tracing::debug!(group = %diff.group, stamp = ?diff.stamp, "Discarding stale addition");
            report.discarded += 1;
            continue;
        };
        let keys: Vec<StoryKey> = diff.stories.iter().map(|s| s.key.clone()).collect();
        for story in diff.stories {
            arena.insert_if_absent(story);
        }
        if diff.complete {
            let listed: HashSet<StoryKey> = keys.iter().cloned().collect();
            report.removed += group.retain_only(&listed);
        }
        report.added += group.extend(keys, arena, registry);
        report.applied += 1;
    }

    for diff in batch.removed {
        let Some(group) = accept(groups, &diff.group, &diff.stamp, global_filter, epoch) else {
            tracing::debug!(group = %diff.group, stamp = ?diff.stamp, "Discarding stale removal");
            report.discarded += 1;
            continue;
        };
        report.removed += group.retract(&diff.keys);
        report.applied += 1;
    }

    report
}
