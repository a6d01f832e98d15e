//! Persistence: the per-source JSON documents and the in-memory story arena.

mod arena;
pub mod document;
mod types;

pub use arena::StoryArena;
pub use document::LockMode;
pub use types::{
    Document, DocumentError, Entry, SourceMeta, Story, StoryKey, STATE_MARKED, STATE_READ,
};
