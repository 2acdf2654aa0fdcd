//! feedtrace - Engagement analytics for replayed social feeds
//!
//! feedtrace records how participants engage with a replayed feed of posts and
//! turns those records into analysis-ready data: viewport tracking → session
//! event log → dwell aggregation → one flat analytics row per session →
//! roster summaries over stored rows.
//!
//! ## Modules
//!
//! - **Tracking**: Threshold-based `vp_enter` / `vp_exit` emission over a host
//!   intersection primitive (`tracker`)
//! - **Analytics**: Dwell reconstruction, row building and roster summaries
//!   (`dwell`, `row`, `roster`, `pipeline`)

pub mod dwell;
pub mod error;
pub mod event_log;
pub mod pipeline;
pub mod roster;
pub mod row;
pub mod tracker;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use dwell::{DwellAggregator, PostDwell};
pub use error::{ComputeError, EventValidationError};
pub use event_log::{EventLog, EventSink};
pub use pipeline::{roster_to_summary, session_to_row, RosterProcessor};
pub use roster::{RosterSummarizer, RosterSummary};
pub use row::{AnalyticsRow, PostGroup, RowBuilder};
pub use tracker::{TrackerOptions, ViewportTracker};
pub use types::{Event, EventAction, Post, Session};

/// Library version reported by the CLI and the C ABI
pub const FEEDTRACE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in diagnostics
pub const PRODUCER_NAME: &str = "feedtrace";
