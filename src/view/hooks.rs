use std::sync::Arc;

use crate::storage::StoryKey;

/// Notifications raised by selection and command handling.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    NoItems,
    Select { group: Arc<str>, story: StoryKey },
    Deselect { group: Arc<str>, story: StoryKey },
    FilterChanged(String),
    TagFilterChanged(String),
    SortChanged(String),
    TagsetChanged(Vec<String>),
    UpdateForced,
    /// Free-form message for the status bar.
    Notice(String),
}

impl HookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoItems => "no-items",
            Self::Select { .. } => "select",
            Self::Deselect { .. } => "deselect",
            Self::FilterChanged(_) => "filter-changed",
            Self::TagFilterChanged(_) => "tag-filter-changed",
            Self::SortChanged(_) => "sort-changed",
            Self::TagsetChanged(_) => "tagset-changed",
            Self::UpdateForced => "update-forced",
            Self::Notice(_) => "notice",
        }
    }

    /// Status bar text, if this event is user-visible.
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::NoItems => Some("No items.".to_string()),
            Self::FilterChanged(f) => Some(format!("Filter: {f}")),
            Self::TagFilterChanged(f) => Some(format!("Tag filter: {f}")),
            Self::SortChanged(s) => Some(format!("Sort: {s}")),
            Self::TagsetChanged(tags) => Some(format!("Tags: {}", tags.join(", "))),
            Self::UpdateForced => Some("Forcing update.".to_string()),
            Self::Notice(msg) => Some(msg.clone()),
            Self::Select { .. } | Self::Deselect { .. } => None,
        }
    }
}

/// Receives hook events as they happen.
pub trait HookSink {
    fn emit(&mut self, event: HookEvent);
}

impl HookSink for Vec<HookEvent> {
    fn emit(&mut self, event: HookEvent) {
        self.push(event);
    }
}
