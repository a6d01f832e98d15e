//! One subscribed source as the feed worker sees it.
//!
//! A store owns the last loaded snapshot of its document, the stories built
//! from it and the countdown to its next reload. It shares the document with
//! the fetch task only through file locks.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::storage::document::{self, LockMode};
use crate::storage::{Document, DocumentError, Entry, Story};
use crate::tag::{FilterId, Registry};

/// Static settings for a store, resolved from configuration.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub path: PathBuf,
    /// Group names as configured; an empty name means "use the source title".
    pub tags: Vec<String>,
    /// Ticks between reloads.
    pub rate: u32,
    /// Stories failing this filter never leave the store.
    pub filter: Option<FilterId>,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub persisted: bool,
    pub loaded: bool,
}

#[derive(Debug)]
pub struct FeedStore {
    index: usize,
    settings: StoreSettings,
    tags: Vec<Arc<str>>,
    time: i64,
    base_set: bool,
    dirty: bool,
    snapshot: Document,
    stories: Vec<Story>,
    ordinals: HashMap<Arc<str>, i64>,
    registry: Arc<Registry>,
}

impl FeedStore {
    pub fn new(index: usize, settings: StoreSettings, registry: Arc<Registry>) -> Self {
        let snapshot = Document::empty(&settings.url);
        Self {
            index,
            settings,
            tags: Vec::new(),
            time: 1,
            base_set: false,
            dirty: false,
            snapshot,
            stories: Vec::new(),
            ordinals: HashMap::new(),
            registry,
        }
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Group names this store contributes. Empty until the first load.
    pub fn tags(&self) -> &[Arc<str>] {
        &self.tags
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Schedules a reload on the next tick.
    pub fn force_update(&mut self) {
        self.time = 1;
    }

    /// Reads the document into the snapshot.
    ///
    /// The very first load waits for the shared lock; later loads give up on
    /// contention and leave the store untouched. Until the fetch task has
    /// written the document, the first load fails with `Unfetched` so group
    /// names are resolved from the real source title.
    pub fn update(&mut self) -> Result<(), DocumentError> {
        let mode = if self.base_set {
            LockMode::NonBlocking
        } else {
            LockMode::Blocking
        };
        let doc = document::read_shared(&self.settings.path, mode)?;

        if !self.base_set {
            if doc.is_placeholder() {
                return Err(DocumentError::Unfetched);
            }
            self.base_set = true;
            self.tags = resolve_tags(&self.settings.tags, &doc);
            tracing::info!(
                store = %self.settings.url,
                tags = ?self.tags,
                "Resolved group names"
            );
        }

        self.snapshot = doc;
        self.absorb();
        Ok(())
    }

    /// Tags every snapshot entry with this store's group names and rebuilds
    /// the story list.
    fn absorb(&mut self) {
        if tag_entries(&mut self.snapshot, &self.tags) {
            self.dirty = true;
        }
        assign_ordinals(&mut self.ordinals, &self.snapshot.entries);
        let filter = self.settings.filter;
        let registry = &self.registry;
        let ordinals = &self.ordinals;
        self.stories = self
            .snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                let mut story = Story::from_entry(self.index, pos, entry);
                if let Some(&ordinal) = ordinals.get(entry.id.as_str()) {
                    story.rank.1 = ordinal;
                }
                story
            })
            .filter(|story| filter.is_none_or(|f| registry.passes(f, story)))
            .collect();
    }

    /// Writes the snapshot back, merged with whatever the fetch task wrote
    /// since the last load. Clears the dirty flag only on success.
    pub fn persist(&mut self) -> Result<(), DocumentError> {
        let snapshot = &self.snapshot;
        let tags = &self.tags;
        let merged = document::update_exclusive(&self.settings.path, &self.settings.url, |disk| {
            disk.overlay_state(snapshot);
            tag_entries(disk, tags);
        })?;
        self.snapshot = merged;
        self.dirty = false;
        self.absorb();
        Ok(())
    }

    /// Sets or clears a state tag on one entry. Returns true if it changed.
    pub fn set_state(&mut self, id: &str, tag: &str, on: bool) -> bool {
        let Some(entry) = self.snapshot.entry_mut(id) else {
            return false;
        };
        let changed = if on {
            entry.add_state(tag)
        } else {
            entry.remove_state(tag)
        };
        if changed {
            self.dirty = true;
            if let Some(story) = self.stories.iter_mut().find(|s| &*s.key.id == id) {
                story.set_state(tag, on);
            }
        }
        changed
    }

    /// Persists pending state, counts down and reloads when due.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if self.dirty {
            match self.persist() {
                Ok(()) => report.persisted = true,
                Err(e) if e.is_contended() => {
                    tracing::debug!(store = %self.settings.url, "Persist deferred, document locked");
                }
                Err(e) => {
                    tracing::warn!(store = %self.settings.url, error = %e, "Failed to persist feed state");
                }
            }
        }

        self.time -= 1;
        if self.time <= 0 {
            let ok = if self.dirty {
                tracing::debug!(store = %self.settings.url, "Reload deferred, unsaved state");
                false
            } else {
                match self.update() {
                    Ok(()) => {
                        report.loaded = true;
                        true
                    }
                    Err(e) if e.is_contended() => {
                        tracing::debug!(store = %self.settings.url, "Reload deferred, document locked");
                        false
                    }
                    Err(e) if e.is_unfetched() => {
                        tracing::debug!(store = %self.settings.url, "Waiting for first fetch");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(store = %self.settings.url, error = %e, "Failed to load feed document");
                        false
                    }
                }
            };
            self.time = if ok && !self.stories.is_empty() {
                i64::from(self.settings.rate.max(1))
            } else {
                1
            };
        }

        report
    }
}

/// Group names for a store after its first load.
///
/// With a source title, empty configured names become the title. Without
/// one, the source URL is prepended and empty names are dropped.
fn resolve_tags(configured: &[String], doc: &Document) -> Vec<Arc<str>> {
    let mut tags: Vec<Arc<str>> = Vec::new();
    let mut push = |name: &str| {
        if !tags.iter().any(|t| &**t == name) {
            tags.push(Arc::from(name));
        }
    };
    match doc.source.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => {
            for name in configured {
                push(if name.is_empty() { title } else { name.as_str() });
            }
        }
        _ => {
            push(&doc.source.url);
            for name in configured.iter().filter(|n| !n.is_empty()) {
                push(name);
            }
        }
    }
    tags
}

/// Gives each unseen entry an ordinal so base order survives reloads.
///
/// Fetches prepend, so unseen entries above the first known one rank before
/// everything seen so far; any others rank after. Ids no longer in the
/// document are forgotten.
fn assign_ordinals(ordinals: &mut HashMap<Arc<str>, i64>, entries: &[Entry]) {
    if ordinals.is_empty() {
        for (i, entry) in entries.iter().enumerate() {
            ordinals
                .entry(Arc::from(entry.id.as_str()))
                .or_insert(i as i64);
        }
        return;
    }

    let min = ordinals.values().copied().min().unwrap_or(0);
    let mut max = ordinals.values().copied().max().unwrap_or(-1);
    let split = entries
        .iter()
        .position(|e| ordinals.contains_key(e.id.as_str()))
        .unwrap_or(entries.len());

    let mut next = min - split as i64;
    for entry in &entries[..split] {
        ordinals.entry(Arc::from(entry.id.as_str())).or_insert(next);
        next += 1;
    }
    for entry in &entries[split..] {
        if !ordinals.contains_key(entry.id.as_str()) {
            max += 1;
            ordinals.insert(Arc::from(entry.id.as_str()), max);
        }
    }

    let present: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    ordinals.retain(|id, _| present.contains(&**id));
}

/// Adds every tag to every entry's state. Returns true if anything changed.
fn tag_entries(doc: &mut Document, tags: &[Arc<str>]) -> bool {
    let mut changed = false;
    for entry in &mut doc.entries {
        for tag in tags {
            changed |= entry.add_state(tag);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::write_exclusive;
    use crate::storage::{Entry, STATE_READ};
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> Entry {
        Entry {
            id: id.to_string(),
            title: format!("Story {id}"),
            link: None,
            summary: None,
            published: None,
            state: Vec::new(),
        }
    }

    fn store_at(dir: &tempfile::TempDir, tags: &[&str], doc: &Document) -> FeedStore {
        let path = dir.path().join("feed.json");
        write_exclusive(&path, doc).unwrap();
        FeedStore::new(
            0,
            StoreSettings {
                url: doc.source.url.clone(),
                path,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                rate: 5,
                filter: None,
            },
            Arc::new(Registry::with_builtins()),
        )
    }

    fn titled(url: &str, title: Option<&str>, ids: &[&str]) -> Document {
        let mut doc = Document::empty(url);
        doc.source.title = title.map(str::to_string);
        doc.entries = ids.iter().map(|id| entry(id)).collect();
        doc
    }

    #[test]
    fn test_resolve_tags_with_title() {
        let doc = titled("u", Some("Example"), &[]);
        let tags = resolve_tags(&["".to_string(), "Tech".to_string()], &doc);
        assert_eq!(tags, vec![Arc::<str>::from("Example"), Arc::from("Tech")]);
    }

    #[test]
    fn test_resolve_tags_without_title() {
        let doc = titled("https://e.com/f", None, &[]);
        let tags = resolve_tags(&["".to_string(), "Tech".to_string()], &doc);
        assert_eq!(
            tags,
            vec![Arc::<str>::from("https://e.com/f"), Arc::from("Tech")]
        );
    }

    #[test]
    fn test_first_update_tags_entries_and_marks_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir, &[""], &titled("u", Some("Ex"), &["a", "b"]));
        store.update().unwrap();
        assert!(!store.tags().is_empty());
        assert!(store.is_dirty());
        assert_eq!(store.stories().len(), 2);
        assert!(store.stories().iter().all(|s| s.has_state("Ex")));
    }

    #[test]
    fn test_tick_reschedules_on_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir, &[""], &titled("u", Some("Ex"), &["a"]));
        let report = store.tick();
        assert!(report.loaded);
        assert_eq!(store.time(), 5);

        // Next tick persists the tags added during the load
        let report = store.tick();
        assert!(report.persisted);
        assert!(!store.is_dirty());
        assert_eq!(store.time(), 4);
    }

    #[test]
    fn test_empty_document_retries_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir, &["Tech"], &titled("u", Some("Ex"), &[]));
        let report = store.tick();
        assert!(report.loaded);
        assert_eq!(store.time(), 1);
    }

    #[test]
    fn test_placeholder_document_defers_group_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        document::ensure_exists(&path, "https://e.com/f").unwrap();
        let mut store = FeedStore::new(
            0,
            StoreSettings {
                url: "https://e.com/f".to_string(),
                path: path.clone(),
                tags: vec![String::new()],
                rate: 5,
                filter: None,
            },
            Arc::new(Registry::with_builtins()),
        );

        let report = store.tick();
        assert!(!report.loaded);
        assert!(store.tags().is_empty());
        assert_eq!(store.time(), 1);

        document::update_exclusive(&path, "https://e.com/f", |doc| {
            doc.merge_fetched(Some("Example".to_string()), None, vec![entry("a")], 0);
        })
        .unwrap();
        assert!(store.tick().loaded);
        assert_eq!(store.tags().to_vec(), vec![Arc::<str>::from("Example")]);
        assert!(store.stories()[0].has_state("Example"));
        assert!(!store.stories()[0].has_state("https://e.com/f"));
    }

    #[test]
    fn test_missing_document_retries_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FeedStore::new(
            0,
            StoreSettings {
                url: "u".to_string(),
                path: dir.path().join("absent.json"),
                tags: vec![String::new()],
                rate: 5,
                filter: None,
            },
            Arc::new(Registry::with_builtins()),
        );
        let report = store.tick();
        assert!(!report.loaded);
        assert_eq!(store.time(), 1);
    }

    #[test]
    fn test_set_state_persists_with_merge() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir, &[""], &titled("u", Some("Ex"), &["a"]));
        store.update().unwrap();
        store.persist().unwrap();

        // The fetch task adds an entry behind the store's back
        let path = dir.path().join("feed.json");
        document::update_exclusive(&path, "u", |doc| {
            doc.merge_fetched(None, None, vec![entry("new"), entry("a")], 0);
        })
        .unwrap();

        assert!(store.set_state("a", STATE_READ, true));
        assert!(!store.set_state("a", STATE_READ, true));
        store.persist().unwrap();

        let disk = document::read_shared(&path, LockMode::Blocking).unwrap();
        let ids: Vec<&str> = disk.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "a"]);
        assert!(disk.entries[1].has_state(STATE_READ));
        assert!(disk.entries[0].has_state("Ex"));
        assert_eq!(store.stories().len(), 2);
    }

    #[test]
    fn test_dirty_store_defers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir, &[""], &titled("u", Some("Ex"), &["a"]));
        store.update().unwrap();

        let path = dir.path().join("feed.json");
        let file = std::fs::File::open(&path).unwrap();
        let _guard = document::lock_shared(&file, LockMode::NonBlocking).unwrap();

        store.force_update();
        let report = store.tick();
        assert!(!report.persisted);
        assert!(!report.loaded);
        assert!(store.is_dirty());
        assert_eq!(store.time(), 1);
    }

    #[test]
    fn test_hard_filter_applies() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::with_builtins());
        let filter = registry.resolve_filter_name("title:keep").unwrap();
        let mut doc = titled("u", Some("Ex"), &["a", "b"]);
        doc.entries[0].title = "keep me".to_string();
        let path = dir.path().join("feed.json");
        write_exclusive(&path, &doc).unwrap();

        let mut store = FeedStore::new(
            2,
            StoreSettings {
                url: "u".to_string(),
                path,
                tags: vec![String::new()],
                rate: 5,
                filter: Some(filter),
            },
            registry,
        );
        store.update().unwrap();
        assert_eq!(store.stories().len(), 1);
        assert_eq!(store.stories()[0].rank, (2, 0));
    }

    #[test]
    fn test_ordinals_keep_prepended_entries_first() {
        let mut ordinals = HashMap::new();
        let first = titled("u", None, &["a", "b"]);
        assign_ordinals(&mut ordinals, &first.entries);

        let second = titled("u", None, &["x", "y", "a", "b", "z"]);
        assign_ordinals(&mut ordinals, &second.entries);
        let mut order: Vec<(&str, i64)> = ordinals.iter().map(|(k, v)| (&**k, *v)).collect();
        order.sort_by_key(|(_, v)| *v);
        let ids: Vec<&str> = order.iter().map(|(k, _)| *k).collect();
        assert_eq!(ids, vec!["x", "y", "a", "b", "z"]);
        assert_eq!(ordinals["a"], 0);

        let third = titled("u", None, &["y", "b"]);
        assign_ordinals(&mut ordinals, &third.entries);
        assert_eq!(ordinals.len(), 2);
        assert!(ordinals["y"] < ordinals["b"]);
    }
}
