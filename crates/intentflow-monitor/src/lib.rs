//! Event monitors for intentflow.
//!
//! A monitor polls one [`provider::EventProvider`] for one user, turns new
//! items into [`intentflow_core::EventSource`]s and hands them to an
//! [`sink::EventSink`], normally the engine's pipeline.
//!
//! ```text
//!  provider ──► dedup ledger ──► transcriber ──► normalize + priority ──► sink
//!  (feed, calendar)   (moka/sqlite)    (voicemail only)
//! ```

pub mod calendar;
pub mod error;
pub mod feed;
pub mod manager;
pub mod normalize;
pub mod priority;
pub mod provider;
pub mod sink;
pub mod transcribe;

pub use calendar::CalendarProvider;
pub use error::{MonitorError, Result};
pub use feed::HttpFeedProvider;
pub use manager::{MonitorConfig, MonitorHandle, MonitorInfo, MonitorManager, default_poll_interval};
pub use normalize::normalize;
pub use priority::{HIGH_KEYWORDS, PriorityHeuristic, URGENT_KEYWORDS};
pub use provider::{EventProvider, RawItem};
pub use sink::EventSink;
pub use transcribe::{HttpTranscriber, Transcriber};
