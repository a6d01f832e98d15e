//! Utility functions for common operations.
//!
//! - **URL validation**: only http(s) links are fetched or opened
//! - **Text processing**: Unicode-aware width calculation, truncation and wrapping
//! - **Tasks**: panic capture for background work

mod task;
mod text;
mod url_validator;

pub use task::{catch_task_panic, catch_thread_panic};
pub use text::{display_width, strip_control_chars, truncate_to_width, wrap_to_width};
pub use url_validator::{validate_url, UrlValidationError};
