//! Terminal User Interface module.
//!
//! # Module Structure
//!
//! - `loop_runner` - Main event loop and terminal management
//! - `story` - Story row layout and the line measurer built on it
//! - `render` - Column layout of the story list
//! - `status` - Status bar widget
//! - `help` - Keybinding overlay

mod help;
mod loop_runner;
mod render;
mod status;
mod story;

pub use loop_runner::{run, Channels};
pub use story::{layout, StoryRenderer, StoryRow};
