use std::collections::{HashMap, HashSet};

use super::types::{Story, StoryKey};

/// The foreground's single copy of every known story.
///
/// Groups hold keys into the arena, so a state change made through one group
/// is seen by every other group carrying the same story.
#[derive(Debug, Default)]
pub struct StoryArena {
    stories: HashMap<StoryKey, Story>,
}

impl StoryArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `story` unless its key is already known. The existing copy
    /// wins because the foreground's state is authoritative.
    pub fn insert_if_absent(&mut self, story: Story) -> bool {
        match self.stories.entry(story.key.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(story);
                true
            }
        }
    }

    pub fn get(&self, key: &StoryKey) -> Option<&Story> {
        self.stories.get(key)
    }

    pub fn get_mut(&mut self, key: &StoryKey) -> Option<&mut Story> {
        self.stories.get_mut(key)
    }

    /// Returns true if the story exists and its state changed.
    pub fn set_state(&mut self, key: &StoryKey, tag: &str, on: bool) -> bool {
        self.stories
            .get_mut(key)
            .is_some_and(|story| story.set_state(tag, on))
    }

    /// Drops every story not in `live`. Returns the number removed.
    pub fn prune(&mut self, live: &HashSet<StoryKey>) -> usize {
        let before = self.stories.len();
        self.stories.retain(|key, _| live.contains(key));
        before - self.stories.len()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Entry, STATE_READ};

    fn story(id: &str) -> Story {
        Story::from_entry(
            0,
            0,
            &Entry {
                id: id.to_string(),
                title: id.to_string(),
                link: None,
                summary: None,
                published: None,
                state: Vec::new(),
            },
        )
    }

    #[test]
    fn test_insert_if_absent_keeps_existing_state() {
        let mut arena = StoryArena::new();
        assert!(arena.insert_if_absent(story("a")));
        assert!(arena.set_state(&StoryKey::new(0, "a"), STATE_READ, true));

        assert!(!arena.insert_if_absent(story("a")));
        assert!(arena.get(&StoryKey::new(0, "a")).unwrap().is_read());
    }

    #[test]
    fn test_set_state_missing_key() {
        let mut arena = StoryArena::new();
        assert!(!arena.set_state(&StoryKey::new(0, "x"), STATE_READ, true));
    }

    #[test]
    fn test_prune() {
        let mut arena = StoryArena::new();
        arena.insert_if_absent(story("a"));
        arena.insert_if_absent(story("b"));
        let live: HashSet<StoryKey> = [StoryKey::new(0, "b")].into_iter().collect();
        assert_eq!(arena.prune(&live), 1);
        assert_eq!(arena.len(), 1);
        assert!(arena.get(&StoryKey::new(0, "b")).is_some());
    }
}
