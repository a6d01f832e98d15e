//! A terminal feed reader that shows stories in named, filterable groups.
//!
//! Background fetch tasks merge remote feeds into per-source JSON documents.
//! A feed worker thread watches those documents and sends per-group diffs to
//! the foreground, which owns the groups, lays them out into a virtual
//! multi-column line map and keeps the selection stable as stories come and
//! go.

pub mod app;
pub mod config;
pub mod feed;
pub mod keybindings;
pub mod storage;
pub mod tag;
pub mod theme;
pub mod ui;
pub mod util;
pub mod view;
