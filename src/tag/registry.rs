//! Named filter predicates and sort comparators with stable ids.
//!
//! Ids index into append-only tables, so an id handed to the worker stays
//! valid for the life of the process. Parametric filters (`title:<regex>`)
//! are registered on first use and reused afterwards.

use regex::RegexBuilder;
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::storage::Story;

pub type Predicate = Arc<dyn Fn(&Story) -> bool + Send + Sync>;
pub type Comparator = Arc<dyn Fn(&Story, &Story) -> Ordering + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortId(pub usize);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Unknown sort: {0}")]
    UnknownSort(String),

    #[error("Invalid pattern in filter '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

struct Named<T> {
    name: String,
    f: T,
}

#[derive(Default)]
struct Tables {
    filters: Vec<Named<Predicate>>,
    sorts: Vec<Named<Comparator>>,
}

/// Shared between the foreground and the feed worker.
pub struct Registry {
    tables: RwLock<Tables>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.read();
        f.debug_struct("Registry")
            .field(
                "filters",
                &tables.filters.iter().map(|n| &n.name).collect::<Vec<_>>(),
            )
            .field(
                "sorts",
                &tables.sorts.iter().map(|n| &n.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn by_published(a: &Story, b: &Story) -> Ordering {
    // Undated stories sort after dated ones
    match (a.published, b.published) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Registry {
    pub fn with_builtins() -> Self {
        let registry = Self {
            tables: RwLock::new(Tables::default()),
        };
        registry.register_filter("all", Arc::new(|_| true));
        registry.register_filter("unread", Arc::new(|s| !s.is_read()));
        registry.register_filter("read", Arc::new(|s| s.is_read()));
        registry.register_filter("marked", Arc::new(|s| s.is_marked()));
        registry.register_filter("unmarked", Arc::new(|s| !s.is_marked()));

        registry.register_sort("none", Arc::new(|_, _| Ordering::Equal));
        registry.register_sort(
            "newest",
            Arc::new(|a, b| match (a.published, b.published) {
                (Some(x), Some(y)) => y.cmp(&x),
                _ => by_published(a, b),
            }),
        );
        registry.register_sort("oldest", Arc::new(by_published));
        registry.register_sort(
            "title",
            Arc::new(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        );
        registry.register_sort(
            "unread_first",
            Arc::new(|a, b| a.is_read().cmp(&b.is_read())),
        );
        registry
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a filter, replacing nothing: an existing name keeps its id.
    pub fn register_filter(&self, name: &str, f: Predicate) -> FilterId {
        let mut tables = self.write();
        if let Some(i) = tables.filters.iter().position(|n| n.name == name) {
            return FilterId(i);
        }
        tables.filters.push(Named {
            name: name.to_string(),
            f,
        });
        FilterId(tables.filters.len() - 1)
    }

    pub fn register_sort(&self, name: &str, f: Comparator) -> SortId {
        let mut tables = self.write();
        if let Some(i) = tables.sorts.iter().position(|n| n.name == name) {
            return SortId(i);
        }
        tables.sorts.push(Named {
            name: name.to_string(),
            f,
        });
        SortId(tables.sorts.len() - 1)
    }

    pub fn find_filter(&self, name: &str) -> Option<FilterId> {
        self.read()
            .filters
            .iter()
            .position(|n| n.name == name)
            .map(FilterId)
    }

    /// Resolves a filter name, registering `title:<regex>` filters on demand.
    pub fn resolve_filter_name(&self, name: &str) -> Result<FilterId, RegistryError> {
        if let Some(id) = self.find_filter(name) {
            return Ok(id);
        }
        let Some(pattern) = name.strip_prefix("title:") else {
            return Err(RegistryError::UnknownFilter(name.to_string()));
        };
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| RegistryError::InvalidPattern {
                name: name.to_string(),
                source,
            })?;
        Ok(self.register_filter(name, Arc::new(move |s| re.is_match(&s.title))))
    }

    pub fn resolve_sort_name(&self, name: &str) -> Result<SortId, RegistryError> {
        self.read()
            .sorts
            .iter()
            .position(|n| n.name == name)
            .map(SortId)
            .ok_or_else(|| RegistryError::UnknownSort(name.to_string()))
    }

    /// Unknown ids pass everything.
    pub fn passes(&self, id: FilterId, story: &Story) -> bool {
        let f = self.read().filters.get(id.0).map(|n| Arc::clone(&n.f));
        f.is_none_or(|f| f(story))
    }

    /// Clones the comparator out so a sort does not hold the table lock.
    pub fn comparator(&self, id: SortId) -> Option<Comparator> {
        self.read().sorts.get(id.0).map(|n| Arc::clone(&n.f))
    }

    pub fn predicate(&self, id: FilterId) -> Option<Predicate> {
        self.read().filters.get(id.0).map(|n| Arc::clone(&n.f))
    }

    pub fn filter_name(&self, id: FilterId) -> String {
        self.read()
            .filters
            .get(id.0)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("#{}", id.0))
    }

    pub fn sort_name(&self, id: SortId) -> String {
        self.read()
            .sorts
            .get(id.0)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("#{}", id.0))
    }
}
