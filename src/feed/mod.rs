//! Everything between a remote feed and the foreground.
//!
//! - [`fetcher`] - HTTP retrieval on the tokio runtime, merged into the
//!   document under an exclusive lock
//! - [`parser`] - RSS/Atom parsing with `feed-rs`
//! - [`store`] - one source's snapshot, countdown and persistence
//! - [`worker`] - owns every store and sends per-group diffs to the UI

mod fetcher;
mod parser;
pub mod store;
pub mod worker;

pub use fetcher::{
    build_client, refresh_all, refresh_one, run_source_loop, Credentials, FetchError, FetchResult,
    Source,
};
pub use parser::{parse_feed, ParsedFeed};
pub use store::{FeedStore, StoreSettings, TickReport};
pub use worker::{FeedWorker, GroupView, ViewState, WorkerCommand};
