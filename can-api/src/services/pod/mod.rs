//! Pod Service - creation with streamed progress, start, delete and list.
//!
//! A `Create` call runs the [`pipeline`] and a [`broadcaster`] side by side:
//! the pipeline fills a [`ProgressTracker`](crate::progress::ProgressTracker)
//! and the broadcaster samples it into the response stream until the
//! pipeline signals termination.

mod api;
pub mod broadcaster;
pub mod pipeline;

pub use api::{PodApiHandler, StreamProgressSink};
pub use broadcaster::{BroadcastSummary, ProgressBroadcaster, ProgressSink, ReportError};
