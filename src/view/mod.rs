//! The line-mapping and selection engine plus diff integration.

pub mod diff;
mod hooks;
pub mod map;
mod selection;

pub use diff::{apply_batch, ApplyReport, CursorStamp, DiffBatch, GroupAdditions, GroupRemovals};
pub use hooks::{HookEvent, HookSink};
pub use map::{Geometry, LineCache, LineMap, MapEntry, Measure};
pub use selection::{Anchor, Selection};
