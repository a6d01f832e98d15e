//! Foreground application state.
//!
//! `App` is the only owner of the story arena, the groups, the line map and
//! the selection. Background work reaches it as [`AppEvent`]s; everything it
//! wants from the feed worker goes out as queued [`WorkerCommand`]s and the
//! [`ViewState`] it publishes.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyModifiers};
use regex::RegexBuilder;

use crate::config::{Settings, ALL_GROUPS};
use crate::feed::{FetchResult, GroupView, ViewState, WorkerCommand};
use crate::keybindings::{Action, Context, KeySpec, KeybindingRegistry};
use crate::storage::{Story, StoryArena, StoryKey, STATE_MARKED, STATE_READ};
use crate::tag::{Cursor, FilterId, Group, Registry, SortId};
use crate::theme::Palette;
use crate::util::validate_url;
use crate::view::{
    apply_batch, Anchor, DiffBatch, Geometry, HookEvent, HookSink, LineCache, LineMap, MapEntry,
    Measure, Selection,
};

/// How long a status message stays visible.
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum prompt input length.
const MAX_PROMPT_LENGTH: usize = 256;

// ============================================================================
// Events and Outcomes
// ============================================================================

/// Messages from background tasks to the foreground loop.
#[derive(Debug)]
pub enum AppEvent {
    /// Per-group membership changes computed by the feed worker.
    Diff(DiffBatch),
    /// Group names seen for the first time, in discovery order.
    GroupsDiscovered(Vec<Arc<str>>),
    /// A fetch task finished one attempt.
    FetchComplete(FetchResult),
    /// A background task panicked.
    ///
    /// Fields:
    /// - `task`: Name of the task that panicked
    /// - `error`: The panic message extracted from the panic payload
    TaskPanicked { task: &'static str, error: String },
}

/// What a command did, so the loop knows how much to repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Nothing,
    Update,
    /// The global filter changed; groups were cleared.
    Refilter,
    /// A group filter changed; the worker resends that group.
    TagFilter,
    /// The tagset changed; a new group set was built.
    Retag,
    /// The whole screen must be repainted.
    RedrawAll,
    Exit,
}

// ============================================================================
// Prompt
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    GotoGroup,
    RelativeGroup,
    Search,
    Filter,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::GotoGroup => "Group",
            Self::RelativeGroup => "Relative group",
            Self::Search => "Inline search",
            Self::Filter => "Filter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub input: String,
}

// ============================================================================
// Notices
// ============================================================================

/// Default hook sink: logs every event and keeps the latest user-visible
/// notice for the status bar.
#[derive(Debug, Default)]
pub struct Notices {
    status: Option<(Cow<'static, str>, Instant)>,
}

impl Notices {
    pub fn set_status(&mut self, msg: impl Into<Cow<'static, str>>) {
        self.status = Some((msg.into(), Instant::now()));
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_ref().map(|(m, _)| m.as_ref())
    }

    /// Drops the status once it has been visible long enough. Returns true
    /// if something was cleared.
    pub fn clear_expired(&mut self) -> bool {
        if let Some((_, time)) = &self.status {
            if time.elapsed() >= STATUS_TIMEOUT {
                self.status = None;
                return true;
            }
        }
        false
    }
}

impl HookSink for Notices {
    fn emit(&mut self, event: HookEvent) {
        tracing::debug!(hook = event.name(), ?event, "Hook");
        if let Some(text) = event.notice() {
            tracing::info!(notice = %text, "Notice");
            self.set_status(text);
        }
    }
}

fn story_for<'a>(arena: &'a StoryArena, entry: &MapEntry) -> Option<&'a Story> {
    arena.get(&entry.story)
}

fn is_unread(arena: &StoryArena, entry: &MapEntry) -> bool {
    story_for(arena, entry).is_some_and(|s| !s.is_read())
}

fn is_marked(arena: &StoryArena, entry: &MapEntry) -> bool {
    story_for(arena, entry).is_some_and(Story::is_marked)
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    registry: Arc<Registry>,
    pub keybindings: KeybindingRegistry,
    pub palette: Palette,

    arena: StoryArena,
    groups: Vec<Group>,
    /// Every group name the worker has announced, in announcement order.
    discovered: Vec<Arc<str>>,

    global_filters: Cursor<FilterId>,
    /// Templates every new group starts from.
    tag_filters: Cursor<FilterId>,
    sorts: Cursor<SortId>,
    tagsets: Cursor<usize>,
    tagset_names: Vec<Vec<String>>,
    /// Bumped whenever the groups are cleared wholesale.
    epoch: u64,

    map: LineMap,
    selection: Selection,
    /// Selection to restore once a cleared view is refilled.
    held: Option<Anchor>,
    cache: LineCache,
    measure: Box<dyn Measure>,
    geometry: Geometry,

    notices: Notices,
    outbox: Vec<WorkerCommand>,
    prompt: Option<Prompt>,
    /// Fetch errors by source URL.
    failing: HashMap<String, String>,

    pub show_help: bool,
    pub help_scroll: usize,
    pub needs_redraw: bool,
}

impl App {
    pub fn new(settings: &Settings, registry: Arc<Registry>, measure: Box<dyn Measure>) -> Self {
        let mut app = Self {
            registry,
            keybindings: settings.keybindings.clone(),
            palette: settings.palette.clone(),
            arena: StoryArena::new(),
            groups: Vec::new(),
            discovered: Vec::new(),
            global_filters: settings.global_filters.clone(),
            tag_filters: settings.tag_filters.clone(),
            sorts: settings.sorts.clone(),
            tagsets: settings.tagsets.clone(),
            tagset_names: settings.tagset_names.clone(),
            epoch: 0,
            map: LineMap::default(),
            selection: Selection::new(),
            held: None,
            cache: LineCache::default(),
            measure,
            geometry: Geometry::new(80, 24, settings.columns),
            notices: Notices::default(),
            outbox: Vec::new(),
            prompt: None,
            failing: HashMap::new(),
            show_help: false,
            help_scroll: 0,
            needs_redraw: true,
        };
        app.groups = app.expand_tagset().into_iter().map(|n| app.make_group(n)).collect();
        app
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn arena(&self) -> &StoryArena {
        &self.arena
    }

    pub fn map(&self) -> &LineMap {
        &self.map
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected(&self) -> Option<&MapEntry> {
        self.selection.entry(&self.map)
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn status(&self) -> Option<&str> {
        self.notices.status()
    }

    pub fn set_status(&mut self, msg: impl Into<Cow<'static, str>>) {
        self.notices.set_status(msg);
        self.needs_redraw = true;
    }

    pub fn clear_expired_status(&mut self) -> bool {
        self.notices.clear_expired()
    }

    pub fn global_filter_name(&self) -> String {
        self.registry.filter_name(self.global_filters.cur())
    }

    pub fn tagset_label(&self) -> String {
        self.current_tagset().join(", ")
    }

    pub fn failing_sources(&self) -> usize {
        self.failing.len()
    }

    /// Commands queued for the feed worker since the last call.
    pub fn take_commands(&mut self) -> Vec<WorkerCommand> {
        std::mem::take(&mut self.outbox)
    }

    /// What the worker should compute diffs for.
    pub fn view_state(&self) -> ViewState {
        ViewState {
            epoch: self.epoch,
            global_filter: self.global_filters.cur(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupView {
                    name: Arc::clone(&g.name),
                    filter: g.filters.cur(),
                    sort: g.sorts.cur(),
                })
                .collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Groups and map
    // ------------------------------------------------------------------------

    fn current_tagset(&self) -> &[String] {
        self.tagset_names
            .get(self.tagsets.cur())
            .map_or(&[], Vec::as_slice)
    }

    /// Group names of the current tagset, with `*` expanded to every
    /// discovered group.
    fn expand_tagset(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = Vec::new();
        for name in self.current_tagset() {
            if name == ALL_GROUPS {
                for d in &self.discovered {
                    if !names.contains(d) {
                        names.push(Arc::clone(d));
                    }
                }
            } else if !names.iter().any(|n| **n == **name) {
                names.push(Arc::from(name.as_str()));
            }
        }
        names
    }

    fn make_group(&self, name: Arc<str>) -> Group {
        Group::new(name, self.tag_filters.clone(), self.sorts.clone())
    }

    /// Lays the groups out again and restores the selection.
    ///
    /// A held anchor survives rebuilds that come up empty, such as one after
    /// a stale batch was discarded, and is spent on the first refill.
    pub fn rebuild_map(&mut self) {
        let live = self.selection.anchor(&self.map);
        let mut measure = self.cache.wrap(&mut self.measure);
        self.map = LineMap::build(&self.groups, &self.arena, &mut measure, self.geometry);
        tracing::trace!(
            entries = self.map.len(),
            cache_hits = self.cache.hits(),
            cache_misses = self.cache.misses(),
            "Rebuilt line map"
        );
        let anchor = match live {
            Some(anchor) => Some(anchor),
            None if self.map.is_empty() => None,
            None => self.held.take(),
        };
        self.selection.reanchor(&self.map, anchor, &mut self.notices);
        self.needs_redraw = true;
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        let geometry = Geometry::new(width, height, self.geometry.columns);
        if geometry != self.geometry {
            self.geometry = geometry;
            self.rebuild_map();
        }
    }

    /// Scrolls so the selection is on screen. Returns true if it moved.
    pub fn keep_visible(&mut self) -> bool {
        self.selection.keep_visible(&self.map, self.geometry)
    }

    fn selected_group(&self) -> Option<usize> {
        self.selected().map(|e| e.group)
    }

    fn selected_key(&self) -> Option<StoryKey> {
        self.selected().map(|e| e.story.clone())
    }

    // ------------------------------------------------------------------------
    // Background events
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: AppEvent) -> Outcome {
        self.needs_redraw = true;
        match event {
            AppEvent::Diff(batch) => self.integrate(batch),
            AppEvent::GroupsDiscovered(names) => self.discover_groups(names),
            AppEvent::FetchComplete(outcome) => {
                match outcome.result {
                    Ok(count) => {
                        tracing::debug!(url = %outcome.url, count, "Fetch complete");
                        self.failing.remove(&outcome.url);
                    }
                    Err(e) => {
                        tracing::warn!(url = %outcome.url, error = %e, "Fetch failed");
                        self.failing.insert(outcome.url, e.to_string());
                    }
                }
                Outcome::Nothing
            }
            AppEvent::TaskPanicked { task, error } => {
                tracing::error!(task, error = %error, "Background task panicked");
                self.set_status(format!("Internal error in {task}: {error}"));
                Outcome::Nothing
            }
        }
    }

    /// Applies a diff batch, rebuilds the map once and re-anchors.
    pub fn integrate(&mut self, batch: DiffBatch) -> Outcome {
        let report = apply_batch(
            batch,
            &mut self.groups,
            &mut self.arena,
            &self.registry,
            self.global_filters.cur(),
            self.epoch,
        );
        tracing::debug!(?report, "Integrated diff batch");
        if report.removed > 0 {
            let live: HashSet<StoryKey> = self
                .groups
                .iter()
                .flat_map(|g| g.items().iter().cloned())
                .collect();
            self.arena.prune(&live);
        }
        self.rebuild_map();
        Outcome::Update
    }

    /// Records newly announced groups; a tagset containing `*` grows to
    /// include them.
    pub fn discover_groups(&mut self, names: Vec<Arc<str>>) -> Outcome {
        for name in names {
            if !self.discovered.contains(&name) {
                self.discovered.push(name);
            }
        }
        let mut added = false;
        for name in self.expand_tagset() {
            if !self.groups.iter().any(|g| g.name == name) {
                let group = self.make_group(name);
                self.groups.push(group);
                added = true;
            }
        }
        if added {
            Outcome::Update
        } else {
            Outcome::Nothing
        }
    }

    // ------------------------------------------------------------------------
    // Command wrappers
    // ------------------------------------------------------------------------

    /// Runs `f` only when there is something on screen.
    fn require_items(&mut self, f: impl FnOnce(&mut Self) -> Outcome) -> Outcome {
        if self.map.is_empty() {
            self.notices.emit(HookEvent::NoItems);
            return Outcome::Nothing;
        }
        f(self)
    }

    /// Runs a selection move. The selection raises its own hooks; crossing
    /// into another group forces a full repaint.
    fn change_selected(
        &mut self,
        f: impl FnOnce(&mut Selection, &LineMap, &StoryArena, &mut Notices) -> bool,
    ) -> Outcome {
        let moved = f(&mut self.selection, &self.map, &self.arena, &mut self.notices);
        if self.selection.take_force_redraw() {
            Outcome::RedrawAll
        } else if moved {
            Outcome::Update
        } else {
            Outcome::Nothing
        }
    }

    /// Steps the global filter. Every group is emptied and refilled by the
    /// worker under the new filter.
    fn change_filter(&mut self, f: impl FnOnce(&mut Cursor<FilterId>) -> bool) -> Outcome {
        if !f(&mut self.global_filters) {
            return Outcome::Nothing;
        }
        let name = self.global_filter_name();
        self.notices.emit(HookEvent::FilterChanged(name));
        self.held = self.selection.anchor(&self.map).or(self.held.take());
        for group in &mut self.groups {
            group.clear();
        }
        self.epoch += 1;
        self.map = LineMap::default();
        self.selection.clear();
        Outcome::Refilter
    }

    fn change_tag_filter(&mut self, f: impl FnOnce(&mut Cursor<FilterId>) -> bool) -> Outcome {
        self.require_items(|app| {
            let Some(gi) = app.selected_group() else {
                return Outcome::Nothing;
            };
            if !f(&mut app.groups[gi].filters) {
                return Outcome::Nothing;
            }
            let name = app.registry.filter_name(app.groups[gi].filters.cur());
            app.notices.emit(HookEvent::TagFilterChanged(name));
            Outcome::TagFilter
        })
    }

    /// Sorts do not change membership, so they apply immediately.
    fn change_sort(&mut self, f: impl FnOnce(&mut Cursor<SortId>) -> bool) -> Outcome {
        self.require_items(|app| {
            let Some(gi) = app.selected_group() else {
                return Outcome::Nothing;
            };
            if !f(&mut app.groups[gi].sorts) {
                return Outcome::Nothing;
            }
            let name = app.registry.sort_name(app.groups[gi].sorts.cur());
            app.notices.emit(HookEvent::SortChanged(name));
            app.groups[gi].resort(&app.arena, &app.registry);
            app.rebuild_map();
            Outcome::Update
        })
    }

    fn change_tagset(&mut self, f: impl FnOnce(&mut Cursor<usize>) -> bool) -> Outcome {
        if !f(&mut self.tagsets) {
            return Outcome::Nothing;
        }
        for group in &mut self.groups {
            group.clear();
        }
        self.groups = self
            .expand_tagset()
            .into_iter()
            .map(|n| self.make_group(n))
            .collect();
        self.held = None;
        self.selection.clear();
        self.map = LineMap::default();
        self.epoch += 1;
        let names = self.groups.iter().map(|g| g.name.to_string()).collect();
        self.notices.emit(HookEvent::TagsetChanged(names));
        Outcome::Retag
    }

    // ------------------------------------------------------------------------
    // Story state
    // ------------------------------------------------------------------------

    /// Changes one state tag in the arena and forwards it to the worker.
    pub fn set_state(&mut self, key: &StoryKey, tag: &str, on: bool) -> bool {
        let changed = self.arena.set_state(key, tag, on);
        if changed {
            self.outbox.push(WorkerCommand::SetState {
                key: key.clone(),
                tag: tag.to_string(),
                on,
            });
        }
        changed
    }

    fn mark_selected(&mut self, tag: &str, on: bool) -> Outcome {
        let Some(key) = self.selected_key() else {
            return Outcome::Nothing;
        };
        self.set_state(&key, tag, on);
        Outcome::Update
    }

    fn toggle_mark(&mut self) -> Outcome {
        let Some(key) = self.selected_key() else {
            return Outcome::Nothing;
        };
        let marked = self.arena.get(&key).is_some_and(Story::is_marked);
        self.set_state(&key, STATE_MARKED, !marked);
        Outcome::Update
    }

    fn clear_marks(&mut self) -> Outcome {
        let keys: Vec<StoryKey> = self
            .map
            .entries()
            .iter()
            .filter(|e| is_marked(&self.arena, e))
            .map(|e| e.story.clone())
            .collect();
        for key in &keys {
            self.set_state(key, STATE_MARKED, false);
        }
        Outcome::Update
    }

    fn mark_groups(&mut self, only: Option<usize>, read: bool) -> Outcome {
        let keys: Vec<StoryKey> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(i, _)| only.map_or(true, |o| o == *i))
            .flat_map(|(_, g)| g.items().iter().cloned())
            .collect();
        for key in &keys {
            self.set_state(key, STATE_READ, read);
        }
        Outcome::Update
    }

    fn open_link(&mut self) -> Outcome {
        let Some(key) = self.selected_key() else {
            return Outcome::Nothing;
        };
        self.set_state(&key, STATE_READ, true);
        let link = self.arena.get(&key).and_then(|s| s.link.clone());
        let Some(link) = link else {
            self.set_status("Story has no link");
            return Outcome::Update;
        };
        match validate_url(&link) {
            Ok(url) => {
                tracing::info!(url = %url, "Opening link");
                if let Err(e) = open::that(url.as_str()) {
                    self.set_status(format!("Failed to open link: {e}"));
                }
            }
            Err(e) => self.set_status(format!("Refusing to open link: {e}")),
        }
        Outcome::Update
    }

    /// Marks every story whose title matches `pattern`, unmarks the rest,
    /// then moves to the nearest mark.
    fn inline_search(&mut self, pattern: &str) -> Outcome {
        if pattern.is_empty() {
            return Outcome::Update;
        }
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                self.set_status(format!("Invalid pattern: {e}"));
                return Outcome::Update;
            }
        };
        let mut seen = HashSet::new();
        let keys: Vec<StoryKey> = self
            .groups
            .iter()
            .flat_map(|g| g.items().iter())
            .filter(|k| seen.insert((*k).clone()))
            .cloned()
            .collect();
        for key in &keys {
            let hit = self.arena.get(key).is_some_and(|s| re.is_match(&s.title));
            self.set_state(key, STATE_MARKED, hit);
        }
        let back = self.change_selected(|s, m, a, h| s.prev_filtered(m, h, |e| is_marked(a, e)));
        let forward = self.change_selected(|s, m, a, h| s.next_filtered(m, h, |e| is_marked(a, e)));
        if back == Outcome::RedrawAll || forward == Outcome::RedrawAll {
            Outcome::RedrawAll
        } else {
            Outcome::Update
        }
    }

    // ------------------------------------------------------------------------
    // Collapse
    // ------------------------------------------------------------------------

    fn toggle_collapse(&mut self) -> Outcome {
        let Some(gi) = self.selected_group() else {
            return Outcome::Nothing;
        };
        self.groups[gi].collapsed = !self.groups[gi].collapsed;
        self.rebuild_map();
        self.selection
            .select_top_of_group(&self.map, Some(gi), &mut self.notices);
        Outcome::RedrawAll
    }

    fn collapse_all(&mut self, collapsed: bool) -> Outcome {
        for group in &mut self.groups {
            group.collapsed = collapsed;
        }
        self.rebuild_map();
        self.selection
            .select_top_of_group(&self.map, None, &mut self.notices);
        Outcome::RedrawAll
    }

    // ------------------------------------------------------------------------
    // Prompt
    // ------------------------------------------------------------------------

    fn open_prompt(&mut self, kind: PromptKind) -> Outcome {
        self.prompt = Some(Prompt {
            kind,
            input: String::new(),
        });
        Outcome::Update
    }

    fn submit_prompt(&mut self) -> Outcome {
        let Some(prompt) = self.prompt.take() else {
            return Outcome::Nothing;
        };
        let input = prompt.input.trim();
        match prompt.kind {
            PromptKind::GotoGroup | PromptKind::RelativeGroup => {
                if input.is_empty() {
                    return Outcome::Update;
                }
                let Ok(n) = input.parse::<i64>() else {
                    self.set_status(format!("Not a number: {input}"));
                    return Outcome::Update;
                };
                let count = self.groups.len();
                let relative = prompt.kind == PromptKind::RelativeGroup;
                let outcome = self.change_selected(|s, m, _, h| {
                    if relative {
                        s.goto_relative_group(m, count, n, h)
                    } else {
                        s.goto_group(m, count, n, h)
                    }
                });
                outcome.max_redraw()
            }
            PromptKind::Search => self.inline_search(input),
            PromptKind::Filter => {
                if input.is_empty() {
                    return Outcome::Update;
                }
                match self.registry.resolve_filter_name(input) {
                    Ok(id) => self.change_filter(|c| c.override_with(id)).max_redraw(),
                    Err(e) => {
                        self.set_status(e.to_string());
                        Outcome::Update
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Routes a key to an action, or to the open prompt's input line.
    pub fn handle_key(&mut self, key: KeySpec) -> Outcome {
        if self.prompt.is_some() {
            if let Some(action) = self.keybindings.action_for_key(key, Context::Prompt) {
                return self.dispatch(action);
            }
            if let Some(prompt) = &mut self.prompt {
                match key.code {
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        if prompt.input.len() < MAX_PROMPT_LENGTH {
                            prompt.input.push(c);
                        }
                    }
                    KeyCode::Backspace => {
                        prompt.input.pop();
                    }
                    _ => return Outcome::Nothing,
                }
            }
            return Outcome::Update;
        }

        let context = if self.show_help {
            Context::Help
        } else {
            Context::Global
        };
        match self.keybindings.action_for_key(key, context) {
            Some(action) => self.dispatch(action),
            None => Outcome::Nothing,
        }
    }

    pub fn dispatch(&mut self, action: Action) -> Outcome {
        tracing::debug!(action = action.name(), "Dispatch");
        let geometry = self.geometry;
        match action {
            Action::Quit => Outcome::Exit,

            Action::NextItem if self.show_help => {
                self.help_scroll = self.help_scroll.saturating_add(1);
                Outcome::Update
            }
            Action::PrevItem if self.show_help => {
                self.help_scroll = self.help_scroll.saturating_sub(1);
                Outcome::Update
            }

            Action::NextItem => self.change_selected(|s, m, _, h| s.next_item(m, h)),
            Action::PrevItem => self.change_selected(|s, m, _, h| s.prev_item(m, h)),
            Action::NextGroup => self.change_selected(|s, m, _, h| s.next_group(m, h)),
            Action::PrevGroup => self.change_selected(|s, m, _, h| s.prev_group(m, h)),
            Action::NextUnread => {
                self.change_selected(|s, m, a, h| s.next_filtered(m, h, |e| is_unread(a, e)))
            }
            Action::PrevUnread => {
                self.change_selected(|s, m, a, h| s.prev_filtered(m, h, |e| is_unread(a, e)))
            }
            Action::NextMarked => {
                self.change_selected(|s, m, a, h| s.next_filtered(m, h, |e| is_marked(a, e)))
            }
            Action::PrevMarked => {
                self.change_selected(|s, m, a, h| s.prev_filtered(m, h, |e| is_marked(a, e)))
            }
            Action::PageDown => self.change_selected(|s, m, _, h| s.page_down(m, geometry, h)),
            Action::PageUp => self.change_selected(|s, m, _, h| s.page_up(m, geometry, h)),

            Action::GotoGroup => self.require_items(|app| app.open_prompt(PromptKind::GotoGroup)),
            Action::RelativeGroup => {
                self.require_items(|app| app.open_prompt(PromptKind::RelativeGroup))
            }
            Action::InlineSearch => self.require_items(|app| app.open_prompt(PromptKind::Search)),
            Action::SetFilter => self.open_prompt(PromptKind::Filter),

            Action::MarkRead => self.require_items(|app| app.mark_selected(STATE_READ, true)),
            Action::MarkUnread => self.require_items(|app| app.mark_selected(STATE_READ, false)),
            Action::ToggleMark => self.require_items(Self::toggle_mark),
            Action::ClearMarks => self.require_items(Self::clear_marks),
            Action::OpenLink => self.require_items(Self::open_link),
            Action::GroupRead => self.require_items(|app| {
                let gi = app.selected_group();
                app.mark_groups(gi, true)
            }),
            Action::GroupUnread => self.require_items(|app| {
                let gi = app.selected_group();
                app.mark_groups(gi, false)
            }),
            Action::AllRead => self.mark_groups(None, true),
            Action::AllUnread => self.mark_groups(None, false),

            Action::NextFilter => self.change_filter(Cursor::next),
            Action::PrevFilter => self.change_filter(Cursor::prev),
            Action::NextGroupFilter => self.change_tag_filter(Cursor::next),
            Action::PrevGroupFilter => self.change_tag_filter(Cursor::prev),
            Action::NextGroupSort => self.change_sort(Cursor::next),
            Action::PrevGroupSort => self.change_sort(Cursor::prev),
            Action::NextTagset => self.change_tagset(Cursor::next),
            Action::PrevTagset => self.change_tagset(Cursor::prev),

            Action::ToggleCollapse => self.require_items(Self::toggle_collapse),
            Action::CollapseAll => self.require_items(|app| app.collapse_all(true)),
            Action::ExpandAll => self.require_items(|app| app.collapse_all(false)),

            Action::ForceUpdate => {
                self.outbox.push(WorkerCommand::ForceUpdate);
                self.notices.emit(HookEvent::UpdateForced);
                Outcome::Update
            }

            Action::ShowHelp => {
                self.show_help = true;
                self.help_scroll = 0;
                Outcome::RedrawAll
            }
            Action::CloseHelp => {
                self.show_help = false;
                Outcome::RedrawAll
            }
            Action::PromptCommit => self.submit_prompt(),
            Action::PromptCancel => {
                self.prompt = None;
                Outcome::Update
            }
        }
    }
}

impl Outcome {
    /// Closing a prompt always needs at least a plain repaint.
    fn max_redraw(self) -> Self {
        match self {
            Self::Nothing => Self::Update,
            other => other,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::FetchError;
    use crate::storage::Entry;
    use crate::view::{CursorStamp, GroupAdditions, GroupRemovals};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    /// Two rows for a group's first story (header), one for the rest.
    struct HeaderLines;

    impl Measure for HeaderLines {
        fn lines(&mut self, _: &Group, _: &Story, first: bool, _: bool, _: usize) -> usize {
            if first {
                2
            } else {
                1
            }
        }
    }

    const CONFIG: &str = r#"
default_sorts = ["none", "title"]
tagsets = [["*"], ["B"]]

[[feeds]]
url = "https://example.com/feed"
"#;

    fn app() -> App {
        let registry = Arc::new(Registry::with_builtins());
        let config = Config::parse(CONFIG).unwrap();
        let settings = Settings::from_config(&config, &registry, Path::new("/data")).unwrap();
        App::new(&settings, registry, Box::new(HeaderLines))
    }

    fn story(id: &str, title: &str, pos: usize) -> Story {
        Story::from_entry(
            0,
            pos,
            &Entry {
                id: id.to_string(),
                title: title.to_string(),
                link: None,
                summary: None,
                published: None,
                state: Vec::new(),
            },
        )
    }

    fn stamp(app: &App, group: usize) -> CursorStamp {
        CursorStamp::current(
            &app.groups()[group],
            app.global_filters.cur(),
            app.epoch(),
        )
    }

    fn complete(app: &App, group: usize, stories: Vec<Story>) -> DiffBatch {
        DiffBatch {
            added: vec![GroupAdditions {
                group: Arc::clone(&app.groups()[group].name),
                stamp: stamp(app, group),
                stories,
                complete: true,
            }],
            removed: Vec::new(),
        }
    }

    fn names(app: &App) -> Vec<String> {
        app.groups().iter().map(|g| g.name.to_string()).collect()
    }

    /// Group A with a1..a3, group B with b1.
    fn loaded() -> App {
        let mut app = app();
        app.discover_groups(vec![Arc::from("A"), Arc::from("B")]);
        let a = complete(
            &app,
            0,
            vec![story("a1", "rust news", 0), story("a2", "go news", 1), story("a3", "Rusty", 2)],
        );
        app.integrate(a);
        let b = complete(&app, 1, vec![story("b1", "other", 3)]);
        app.integrate(b);
        app
    }

    fn selected_id(app: &App) -> Option<String> {
        app.selected().map(|e| e.story.id.to_string())
    }

    #[test]
    fn test_wildcard_tagset_grows_with_discovery() {
        let mut app = app();
        assert!(app.groups().is_empty());
        assert_eq!(
            app.discover_groups(vec![Arc::from("A"), Arc::from("B")]),
            Outcome::Update
        );
        assert_eq!(names(&app), vec!["A", "B"]);
        assert_eq!(app.discover_groups(vec![Arc::from("A")]), Outcome::Nothing);
        assert_eq!(app.view_state().groups.len(), 2);
    }

    #[test]
    fn test_first_diff_selects_top() {
        let app = loaded();
        assert_eq!(app.map().len(), 4);
        assert_eq!(selected_id(&app).as_deref(), Some("a1"));
    }

    #[test]
    fn test_navigation_and_state_forwarding() {
        let mut app = loaded();
        assert_eq!(app.dispatch(Action::NextItem), Outcome::Update);
        assert_eq!(app.dispatch(Action::MarkRead), Outcome::Update);
        let key = StoryKey::new(0, "a2");
        assert!(app.arena().get(&key).unwrap().is_read());
        assert_eq!(
            app.take_commands(),
            vec![WorkerCommand::SetState {
                key,
                tag: STATE_READ.to_string(),
                on: true
            }]
        );
        // Marking again changes nothing and sends nothing
        app.dispatch(Action::MarkRead);
        assert!(app.take_commands().is_empty());
    }

    #[test]
    fn test_group_change_forces_redraw() {
        let mut app = loaded();
        assert_eq!(app.dispatch(Action::NextGroup), Outcome::RedrawAll);
        assert_eq!(selected_id(&app).as_deref(), Some("b1"));
    }

    #[test]
    fn test_no_items_notice() {
        let mut app = app();
        assert_eq!(app.dispatch(Action::NextItem), Outcome::Nothing);
        assert_eq!(app.status(), Some("No items."));
        assert_eq!(app.dispatch(Action::ToggleMark), Outcome::Nothing);
    }

    #[test]
    fn test_next_unread_skips_read() {
        let mut app = loaded();
        app.set_state(&StoryKey::new(0, "a2"), STATE_READ, true);
        app.dispatch(Action::NextUnread);
        assert_eq!(selected_id(&app).as_deref(), Some("a3"));
    }

    #[test]
    fn test_filter_change_discards_stale_and_restores_selection() {
        let mut app = loaded();
        app.dispatch(Action::NextItem);
        let stale = complete(&app, 0, vec![story("a1", "rust news", 0)]);

        assert_eq!(app.dispatch(Action::NextFilter), Outcome::Refilter);
        assert_eq!(app.epoch(), 1);
        assert_eq!(app.status(), Some("Filter: unread"));
        assert!(app.groups().iter().all(Group::is_empty));
        assert!(app.selected().is_none());

        app.integrate(stale);
        assert!(app.map().is_empty());
        assert_eq!(app.status(), Some("Filter: unread"));

        let fresh = complete(&app, 0, vec![story("a1", "rust news", 0), story("a2", "go news", 1)]);
        app.integrate(fresh);
        assert_eq!(selected_id(&app).as_deref(), Some("a2"));
    }

    #[test]
    fn test_removal_diff_reanchors_to_group_top() {
        let mut app = loaded();
        app.dispatch(Action::NextItem);
        let batch = DiffBatch {
            added: Vec::new(),
            removed: vec![GroupRemovals {
                group: Arc::from("A"),
                stamp: stamp(&app, 0),
                keys: vec![StoryKey::new(0, "a2")],
            }],
        };
        app.integrate(batch);
        assert_eq!(app.map().len(), 3);
        assert_eq!(selected_id(&app).as_deref(), Some("a1"));
        assert!(app.arena().get(&StoryKey::new(0, "a2")).is_none());
    }

    #[test]
    fn test_sort_change_applies_immediately() {
        let mut app = loaded();
        assert_eq!(app.dispatch(Action::NextGroupSort), Outcome::Update);
        assert_eq!(app.status(), Some("Sort: title"));
        let order: Vec<&str> = app.groups()[0].items().iter().map(|k| &*k.id).collect();
        assert_eq!(order, vec!["a2", "a1", "a3"]);
        // The selection follows its story, not its position
        assert_eq!(selected_id(&app).as_deref(), Some("a1"));
        assert_ne!(app.view_state().groups[0].sort, app.view_state().groups[1].sort);
    }

    #[test]
    fn test_tag_filter_change_publishes_new_stamp() {
        let mut app = loaded();
        let before = app.view_state();
        // A single default tag filter cannot step
        assert_eq!(app.dispatch(Action::NextGroupFilter), Outcome::Nothing);
        assert_eq!(app.view_state(), before);
    }

    #[test]
    fn test_tagset_change_rebuilds_groups() {
        let mut app = loaded();
        assert_eq!(app.dispatch(Action::NextTagset), Outcome::Retag);
        assert_eq!(names(&app), vec!["B"]);
        assert!(app.selected().is_none());
        assert_eq!(app.epoch(), 1);
        assert_eq!(app.status(), Some("Tags: B"));
    }

    #[test]
    fn test_collapse_all_is_idempotent() {
        let mut app = loaded();
        app.dispatch(Action::CollapseAll);
        let once = app.map().entries().to_vec();
        app.dispatch(Action::CollapseAll);
        assert_eq!(app.map().entries(), once.as_slice());
        assert_eq!(once.len(), 2);

        app.dispatch(Action::ExpandAll);
        assert_eq!(app.map().len(), 4);
    }

    #[test]
    fn test_toggle_collapse_selects_group_top() {
        let mut app = loaded();
        app.dispatch(Action::NextItem);
        assert_eq!(app.dispatch(Action::ToggleCollapse), Outcome::RedrawAll);
        assert!(app.groups()[0].collapsed);
        assert_eq!(selected_id(&app).as_deref(), Some("a1"));
        assert_eq!(app.map().len(), 2);
    }

    #[test]
    fn test_inline_search_marks_and_jumps() {
        let mut app = loaded();
        assert_eq!(app.dispatch(Action::InlineSearch), Outcome::Update);
        for c in "^rust".chars() {
            app.handle_key(KeySpec::char(c));
        }
        app.handle_key(KeySpec::plain(KeyCode::Enter));
        assert!(app.prompt().is_none());

        let marked: Vec<bool> = ["a1", "a2", "a3", "b1"]
            .iter()
            .map(|id| app.arena().get(&StoryKey::new(0, *id)).unwrap().is_marked())
            .collect();
        assert_eq!(marked, vec![true, false, true, false]);
        assert_eq!(selected_id(&app).as_deref(), Some("a3"));
    }

    #[test]
    fn test_goto_group_prompt() {
        let mut app = loaded();
        app.dispatch(Action::GotoGroup);
        app.handle_key(KeySpec::char('-'));
        app.handle_key(KeySpec::char('1'));
        app.dispatch(Action::PromptCommit);
        assert_eq!(selected_id(&app).as_deref(), Some("b1"));

        app.dispatch(Action::GotoGroup);
        app.handle_key(KeySpec::char('x'));
        app.dispatch(Action::PromptCommit);
        assert_eq!(app.status(), Some("Not a number: x"));
    }

    #[test]
    fn test_prompt_swallows_list_keys() {
        let mut app = loaded();
        app.dispatch(Action::RelativeGroup);
        app.handle_key(KeySpec::char('q'));
        assert_eq!(app.prompt().map(|p| p.input.as_str()), Some("q"));
        app.handle_key(KeySpec::plain(KeyCode::Backspace));
        app.handle_key(KeySpec::plain(KeyCode::Esc));
        assert!(app.prompt().is_none());
        assert_eq!(app.handle_key(KeySpec::char('q')), Outcome::Exit);
    }

    #[test]
    fn test_set_filter_prompt_rejects_unknown() {
        let mut app = loaded();
        app.dispatch(Action::SetFilter);
        for c in "bogus".chars() {
            app.handle_key(KeySpec::char(c));
        }
        app.dispatch(Action::PromptCommit);
        assert_eq!(app.epoch(), 0);
        assert!(app.status().is_some_and(|s| s.contains("bogus")));
    }

    #[test]
    fn test_group_and_all_read() {
        let mut app = loaded();
        app.dispatch(Action::GroupRead);
        assert_eq!(app.groups()[0].unread_count(app.arena()), 0);
        assert_eq!(app.groups()[1].unread_count(app.arena()), 1);
        app.dispatch(Action::AllUnread);
        assert_eq!(app.groups()[0].unread_count(app.arena()), 3);
        assert_eq!(app.take_commands().len(), 6);
    }

    #[test]
    fn test_force_update_queues_command() {
        let mut app = app();
        assert_eq!(app.dispatch(Action::ForceUpdate), Outcome::Update);
        assert_eq!(app.take_commands(), vec![WorkerCommand::ForceUpdate]);
        assert_eq!(app.status(), Some("Forcing update."));
    }

    #[test]
    fn test_fetch_results_tracked() {
        let mut app = app();
        let failed = FetchResult {
            url: "https://example.com/feed".to_string(),
            result: Err(FetchError::HttpStatus(500)),
        };
        app.handle_event(AppEvent::FetchComplete(failed));
        assert_eq!(app.failing_sources(), 1);
        let ok = FetchResult {
            url: "https://example.com/feed".to_string(),
            result: Ok(3),
        };
        app.handle_event(AppEvent::FetchComplete(ok));
        assert_eq!(app.failing_sources(), 0);
    }

    #[test]
    fn test_help_context_scrolls_instead_of_moving() {
        let mut app = loaded();
        app.handle_key(KeySpec::char('?'));
        assert!(app.show_help);
        app.handle_key(KeySpec::char('j'));
        assert_eq!(app.help_scroll, 1);
        assert_eq!(selected_id(&app).as_deref(), Some("a1"));
        assert_eq!(app.handle_key(KeySpec::char('q')), Outcome::RedrawAll);
        assert!(!app.show_help);
    }

    #[test]
    fn test_open_link_without_link_marks_read() {
        let mut app = loaded();
        app.dispatch(Action::OpenLink);
        assert!(app.arena().get(&StoryKey::new(0, "a1")).unwrap().is_read());
        assert_eq!(app.status(), Some("Story has no link"));
    }
}
