use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::util::strip_control_chars;

/// State tag carried by stories the user has read.
pub const STATE_READ: &str = "read";

/// State tag carried by stories the user has marked.
pub const STATE_MARKED: &str = "marked";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while reading or writing a feed document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds a conflicting lock on the document.
    #[error("Document is locked by another writer")]
    Contended,

    #[error("Malformed document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The placeholder written before the first fetch: no title, no entries.
    #[error("Document has not been fetched yet")]
    Unfetched,
}

impl DocumentError {
    pub fn is_contended(&self) -> bool {
        matches!(self, DocumentError::Contended)
    }

    pub fn is_unfetched(&self) -> bool {
        matches!(self, DocumentError::Unfetched)
    }
}

// ============================================================================
// Persisted Document
// ============================================================================

/// Source metadata stored at the top of each document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub url: String,
}

/// One persisted story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<i64>,
    #[serde(default)]
    pub state: Vec<String>,
}

impl Entry {
    pub fn has_state(&self, tag: &str) -> bool {
        self.state.iter().any(|s| s == tag)
    }

    /// Adds `tag` to the state set. Returns true if it was not already present.
    pub fn add_state(&mut self, tag: &str) -> bool {
        if self.has_state(tag) {
            return false;
        }
        self.state.push(tag.to_string());
        true
    }

    /// Removes `tag` from the state set. Returns true if it was present.
    pub fn remove_state(&mut self, tag: &str) -> bool {
        let before = self.state.len();
        self.state.retain(|s| s != tag);
        self.state.len() != before
    }
}

/// The on-disk snapshot of one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source: SourceMeta,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Document {
    pub fn empty(url: &str) -> Self {
        Self {
            source: SourceMeta {
                url: url.to_string(),
                ..SourceMeta::default()
            },
            entries: Vec::new(),
        }
    }

    /// Folds a freshly fetched entry list into this document.
    ///
    /// Incoming entries come first in feed order and inherit the state of any
    /// entry already stored under the same id. Older entries follow. With a
    /// non-zero `keep` the list is capped, but never below the incoming count.
    pub fn merge_fetched(
        &mut self,
        title: Option<String>,
        link: Option<String>,
        incoming: Vec<Entry>,
        keep: usize,
    ) {
        if title.is_some() {
            self.source.title = title;
        }
        if link.is_some() {
            self.source.link = link;
        }

        let mut previous: HashMap<String, Entry> = HashMap::with_capacity(self.entries.len());
        let mut previous_order = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            previous_order.push(entry.id.clone());
            previous.insert(entry.id.clone(), entry);
        }

        let incoming_len = incoming.len();
        let mut merged = Vec::with_capacity(incoming_len + previous_order.len());
        for mut entry in incoming {
            if merged.iter().any(|e: &Entry| e.id == entry.id) {
                continue;
            }
            if let Some(old) = previous.remove(&entry.id) {
                entry.state = old.state;
            }
            merged.push(entry);
        }
        for id in previous_order {
            if let Some(old) = previous.remove(&id) {
                merged.push(old);
            }
        }

        if keep > 0 {
            merged.truncate(keep.max(incoming_len));
        }
        self.entries = merged;
    }

    /// Copies the state sets of `snapshot` onto the entries this document
    /// shares with it. Entries only present here keep their own state.
    pub fn overlay_state(&mut self, snapshot: &Document) {
        let states: HashMap<&str, &Vec<String>> = snapshot
            .entries
            .iter()
            .map(|e| (e.id.as_str(), &e.state))
            .collect();
        for entry in &mut self.entries {
            if let Some(state) = states.get(entry.id.as_str()) {
                entry.state = (*state).clone();
            }
        }
    }

    /// True for the placeholder `ensure_exists` writes.
    pub fn is_placeholder(&self) -> bool {
        self.source.title.is_none() && self.entries.is_empty()
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

// ============================================================================
// In-memory Stories
// ============================================================================

/// Identity of a story: the owning store index plus the entry id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoryKey {
    pub store: usize,
    pub id: Arc<str>,
}

impl StoryKey {
    pub fn new(store: usize, id: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }
}

/// A story as the foreground and the worker see it.
///
/// `revision` increases on every state change so cached measurements keyed on
/// it go stale automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub key: StoryKey,
    pub title: Arc<str>,
    pub link: Option<Arc<str>>,
    pub summary: Option<Arc<str>>,
    pub published: Option<DateTime<Utc>>,
    pub state: BTreeSet<String>,
    /// Base rank: (store index, ordinal within the store). Stores keep the
    /// ordinal of an id fixed across reloads.
    pub rank: (usize, i64),
    pub revision: u64,
}

impl Story {
    pub fn from_entry(store: usize, position: usize, entry: &Entry) -> Self {
        // SEC-001: feed text reaches the terminal, so strip escape sequences
        let title = strip_control_chars(entry.title.trim());
        let title: Arc<str> = if title.is_empty() {
            Arc::from("Untitled")
        } else {
            Arc::from(title.as_ref())
        };
        Self {
            key: StoryKey::new(store, entry.id.as_str()),
            title,
            link: entry.link.as_deref().map(Arc::from),
            summary: entry
                .summary
                .as_deref()
                .map(|s| Arc::from(strip_control_chars(s).as_ref())),
            published: entry
                .published
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            state: entry.state.iter().cloned().collect(),
            rank: (store, i64::try_from(position).unwrap_or(i64::MAX)),
            revision: 0,
        }
    }

    pub fn has_state(&self, tag: &str) -> bool {
        self.state.contains(tag)
    }

    pub fn is_read(&self) -> bool {
        self.has_state(STATE_READ)
    }

    pub fn is_marked(&self) -> bool {
        self.has_state(STATE_MARKED)
    }

    /// Sets or clears `tag`. Returns true if the state actually changed.
    pub fn set_state(&mut self, tag: &str, on: bool) -> bool {
        let changed = if on {
            self.state.insert(tag.to_string())
        } else {
            self.state.remove(tag)
        };
        if changed {
            self.revision += 1;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, state: &[&str]) -> Entry {
        Entry {
            id: id.to_string(),
            title: format!("Title {id}"),
            link: Some(format!("https://example.com/{id}")),
            summary: None,
            published: Some(1_700_000_000),
            state: state.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ids(doc: &Document) -> Vec<&str> {
        doc.entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_entry_state_add_remove() {
        let mut e = entry("a", &[]);
        assert!(e.add_state("read"));
        assert!(!e.add_state("read"));
        assert!(e.has_state("read"));
        assert!(e.remove_state("read"));
        assert!(!e.remove_state("read"));
    }

    #[test]
    fn test_merge_fetched_carries_state_and_keeps_old() {
        let mut doc = Document::empty("https://example.com/feed");
        doc.entries = vec![entry("b", &["read"]), entry("old", &["marked"])];

        doc.merge_fetched(
            Some("Example".to_string()),
            None,
            vec![entry("a", &[]), entry("b", &[])],
            0,
        );

        assert_eq!(ids(&doc), vec!["a", "b", "old"]);
        assert_eq!(doc.entries[1].state, vec!["read".to_string()]);
        assert_eq!(doc.entries[2].state, vec!["marked".to_string()]);
        assert_eq!(doc.source.title.as_deref(), Some("Example"));
    }

    #[test]
    fn test_merge_fetched_keep_never_below_incoming() {
        let mut doc = Document::empty("u");
        doc.entries = vec![entry("x", &[]), entry("y", &[])];
        doc.merge_fetched(None, None, vec![entry("a", &[]), entry("b", &[])], 1);
        assert_eq!(ids(&doc), vec!["a", "b"]);

        doc.merge_fetched(None, None, vec![entry("c", &[])], 2);
        assert_eq!(ids(&doc), vec!["c", "a"]);
    }

    #[test]
    fn test_merge_fetched_drops_duplicate_incoming() {
        let mut doc = Document::empty("u");
        doc.merge_fetched(None, None, vec![entry("a", &[]), entry("a", &[])], 0);
        assert_eq!(ids(&doc), vec!["a"]);
    }

    #[test]
    fn test_overlay_state_prefers_snapshot() {
        let mut disk = Document::empty("u");
        disk.entries = vec![entry("new", &[]), entry("a", &[])];
        let mut snapshot = Document::empty("u");
        snapshot.entries = vec![entry("a", &["read", "Tech"])];

        disk.overlay_state(&snapshot);
        assert_eq!(ids(&disk), vec!["new", "a"]);
        assert!(disk.entries[0].state.is_empty());
        assert_eq!(disk.entries[1].state, vec!["read", "Tech"]);
    }

    #[test]
    fn test_story_from_entry_strips_controls() {
        let mut e = entry("a", &["read"]);
        e.title = "\x1b[31mRed\x1b[0m".to_string();
        let story = Story::from_entry(3, 7, &e);
        assert_eq!(&*story.title, "Red");
        assert_eq!(story.rank, (3, 7));
        assert_eq!(story.key, StoryKey::new(3, "a"));
        assert!(story.is_read());
        assert!(story.published.is_some());
    }

    #[test]
    fn test_story_empty_title_becomes_untitled() {
        let mut e = entry("a", &[]);
        e.title = "   ".to_string();
        assert_eq!(&*Story::from_entry(0, 0, &e).title, "Untitled");
    }

    #[test]
    fn test_story_set_state_bumps_revision_only_on_change() {
        let mut story = Story::from_entry(0, 0, &entry("a", &[]));
        assert!(story.set_state(STATE_MARKED, true));
        assert_eq!(story.revision, 1);
        assert!(!story.set_state(STATE_MARKED, true));
        assert_eq!(story.revision, 1);
        assert!(story.set_state(STATE_MARKED, false));
        assert_eq!(story.revision, 2);
    }

    #[test]
    fn test_document_json_shape() {
        let json = r#"{"source":{"url":"https://e.com/f"},"entries":[{"id":"1","title":"t"}]}"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.source.url, "https://e.com/f");
        assert!(doc.entries[0].state.is_empty());
        assert!(doc.entries[0].link.is_none());
    }
}
