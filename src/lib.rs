//! # op-tracker
//!
//! Records the insert, update, delete and query operations a document
//! database driver performs, for inspection in debug panels and tests.
//!
//! A driver embeds a [`HookPoint`] and routes its four entry points through
//! it: document insertion, document update, document deletion, and cursor
//! batch fetch. A [`Tracker`] installed on that hook point times every call,
//! decodes its arguments and, for queries, copies the results into one of
//! four logs. Nothing is recorded and nothing is timed while no tracker is
//! installed.
//!
//! ## Features
//!
//! - **Scoped Installation**: `tracker.scope(&client)` installs and the guard
//!   uninstalls on every exit path
//! - **Query Decoding**: finds, counts, aggregations and generic commands are
//!   told apart; get-more continuations never produce extra records
//! - **Stack Traces**: optionally record where each operation was issued,
//!   with tracker and driver frames filtered out
//! - **Tracing Spans**: every recorded call runs inside a `db.query` span
//!   that nests under the caller's current span
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use op_tracker::Tracker;
//!
//! let tracker = Tracker::default();
//! {
//!     let _scope = tracker.scope(&client)?;
//!     people.insert_one(doc! { "email": "jane@example.org" })?;
//!     people.find_one(doc! { "email": "jane@example.org" })?;
//! }
//!
//! assert_eq!(tracker.inserts().len(), 1);
//! assert_eq!(tracker.queries()[0].result.len(), 1);
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use op_tracker::{Tracker, TrackerConfig};
//!
//! let config = TrackerConfig::default()
//!     .with_stack_traces(true)          // Capture call sites (default: false)
//!     .with_driver_module("mongodb")    // Hide driver frames from traces
//!     .with_slow_query_threshold(Duration::from_millis(100));
//!
//! let tracker = Tracker::new(config);
//! ```
//!
//! ## Query Records
//!
//! | Operation | Decoded from |
//! |-----------|--------------|
//! | `find` | any cursor on a regular collection |
//! | `count` | a `$cmd` query with a `count` field |
//! | `aggregate` | a `$cmd` query with an `aggregate` field |
//! | `command` | any other `$cmd` query |

mod config;
mod cursor;
mod error;
mod extract;
mod hook;
mod record;
mod recorder;
mod stacktrace;
mod tracker;

pub use config::TrackerConfig;
pub use cursor::CursorInternals;
pub use error::{Result, TrackerError};
pub use extract::{format_ordering, COMMAND_COLLECTION};
pub use hook::{HookPoint, HookTarget, HOOK_API_VERSION};
pub use record::{
    InsertRecord, InsertedDocuments, InsertedRef, Limit, QueryOperation, QueryRecord,
    RemoveRecord, StackFrame, UpdateRecord,
};
pub use recorder::UpdateCall;
pub use tracker::{Tracker, TrackerScope};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CursorInternals, HookPoint, HookTarget, Tracker, TrackerConfig, TrackerScope, UpdateCall,
    };
}
