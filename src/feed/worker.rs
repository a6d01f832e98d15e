//! The feed worker: owns every `FeedStore` and turns their contents into
//! per-group diffs for the foreground.
//!
//! It runs on its own thread. The foreground publishes what it is showing
//! through a `watch` channel and sends state changes as commands; the
//! worker answers with `AppEvent::GroupsDiscovered` and `AppEvent::Diff`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};

use super::store::FeedStore;
use crate::app::AppEvent;
use crate::storage::{Story, StoryKey};
use crate::tag::{FilterId, Registry, SortId};
use crate::view::{CursorStamp, DiffBatch, GroupAdditions, GroupRemovals};

/// Requests from the foreground.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    SetState { key: StoryKey, tag: String, on: bool },
    ForceUpdate,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    pub name: Arc<str>,
    pub filter: FilterId,
    pub sort: SortId,
}

/// What the foreground currently displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub epoch: u64,
    pub global_filter: FilterId,
    pub groups: Vec<GroupView>,
}

#[derive(Debug)]
struct Baseline {
    stamp: CursorStamp,
    keys: HashSet<StoryKey>,
}

pub struct FeedWorker {
    stores: Vec<FeedStore>,
    registry: Arc<Registry>,
    commands: mpsc::Receiver<WorkerCommand>,
    view: watch::Receiver<ViewState>,
    events: mpsc::Sender<AppEvent>,
    baselines: HashMap<Arc<str>, Baseline>,
    announced: HashSet<Arc<str>>,
    primed: bool,
}

impl FeedWorker {
    pub fn new(
        stores: Vec<FeedStore>,
        registry: Arc<Registry>,
        commands: mpsc::Receiver<WorkerCommand>,
        view: watch::Receiver<ViewState>,
        events: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            stores,
            registry,
            commands,
            view,
            events,
            baselines: HashMap::new(),
            announced: HashSet::new(),
            primed: false,
        }
    }

    /// Ticks until shutdown, then persists whatever is still dirty.
    pub fn run(mut self, tick: Duration) {
        tracing::info!(stores = self.stores.len(), "Feed worker started");
        while self.step() {
            std::thread::sleep(tick);
        }
        for store in &mut self.stores {
            if store.is_dirty() {
                if let Err(e) = store.persist() {
                    tracing::warn!(store = %store.url(), error = %e, "Failed to persist on shutdown");
                }
            }
        }
        tracing::info!("Feed worker stopped");
    }

    /// One tick. Returns false once the worker should stop.
    pub fn step(&mut self) -> bool {
        let mut state_changed = false;
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::SetState { key, tag, on }) => {
                    if let Some(store) = self.stores.get_mut(key.store) {
                        state_changed |= store.set_state(&key.id, &tag, on);
                    }
                }
                Ok(WorkerCommand::ForceUpdate) => {
                    tracing::info!("Forcing update of all stores");
                    for store in &mut self.stores {
                        store.force_update();
                    }
                }
                Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => break,
            }
        }

        let mut loaded = false;
        for store in &mut self.stores {
            loaded |= store.tick().loaded;
        }

        if !self.announce_groups() {
            return false;
        }

        let view_changed = self.view.has_changed().unwrap_or(false);
        let view = self.view.borrow_and_update().clone();

        if loaded || state_changed || view_changed || !self.primed {
            self.primed = true;
            let batch = self.compute(&view);
            if !batch.is_empty() && self.events.blocking_send(AppEvent::Diff(batch)).is_err() {
                return false;
            }
        }
        true
    }

    /// Sends group names not yet announced, in store order.
    fn announce_groups(&mut self) -> bool {
        let mut fresh = Vec::new();
        for store in &self.stores {
            for tag in store.tags() {
                if self.announced.insert(Arc::clone(tag)) {
                    fresh.push(Arc::clone(tag));
                }
            }
        }
        if fresh.is_empty() {
            return true;
        }
        tracing::info!(groups = ?fresh, "Discovered groups");
        self.events
            .blocking_send(AppEvent::GroupsDiscovered(fresh))
            .is_ok()
    }

    /// Diffs every viewed group's membership against its baseline.
    fn compute(&mut self, view: &ViewState) -> DiffBatch {
        let mut batch = DiffBatch::default();

        for group in &view.groups {
            let stamp = CursorStamp {
                global_filter: view.global_filter,
                group_filter: group.filter,
                sort: group.sort,
                epoch: view.epoch,
            };
            let members = self.membership(group, view.global_filter);
            let keys: HashSet<StoryKey> = members.iter().map(|s| s.key.clone()).collect();

            match self.baselines.get(&group.name) {
                Some(base) if base.stamp == stamp => {
                    let added: Vec<Story> = members
                        .into_iter()
                        .filter(|s| !base.keys.contains(&s.key))
                        .collect();
                    let removed: Vec<StoryKey> = base
                        .keys
                        .iter()
                        .filter(|k| !keys.contains(*k))
                        .cloned()
                        .collect();
                    if !added.is_empty() {
                        batch.added.push(GroupAdditions {
                            group: Arc::clone(&group.name),
                            stamp,
                            stories: added,
                            complete: false,
                        });
                    }
                    if !removed.is_empty() {
                        batch.removed.push(GroupRemovals {
                            group: Arc::clone(&group.name),
                            stamp,
                            keys: removed,
                        });
                    }
                }
                _ => {
                    batch.added.push(GroupAdditions {
                        group: Arc::clone(&group.name),
                        stamp,
                        stories: members,
                        complete: true,
                    });
                }
            }
            self.baselines
                .insert(Arc::clone(&group.name), Baseline { stamp, keys });
        }

        let viewed: HashSet<&Arc<str>> = view.groups.iter().map(|g| &g.name).collect();
        self.baselines.retain(|name, _| viewed.contains(name));
        batch
    }

    fn membership(&self, group: &GroupView, global_filter: FilterId) -> Vec<Story> {
        let global = self.registry.predicate(global_filter);
        let local = self.registry.predicate(group.filter);
        self.stores
            .iter()
            .flat_map(|store| store.stories())
            .filter(|s| s.has_state(&group.name))
            .filter(|s| global.as_ref().is_none_or(|f| f(s)))
            .filter(|s| local.as_ref().is_none_or(|f| f(s)))
            .cloned()
            .collect()
    }
}
