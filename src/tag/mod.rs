//! Groups ("tags") and the filter/sort machinery they carry.

mod cursor;
mod group;
mod registry;

pub use cursor::Cursor;
pub use group::Group;
pub use registry::{Comparator, FilterId, Predicate, Registry, RegistryError, SortId};
