//! Janus - pull social media posts into caches, spreadsheets and tables
//!
//! A [`Pipeline`] binds one [`Source`] (live feed, disk cache or tabular
//! store) and fans every post out to its enabled [`Sink`]s.

pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod pipeline;
pub mod post;
pub mod projection;
pub mod registry;
pub mod session;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod timeparse;

// Re-export commonly used types
pub use config::Config;
pub use error::{JanusError, Result};
pub use pipeline::{Pipeline, PipelineState, PullSummary, RunError};
pub use post::{Comment, Post, PostOrigin, PostSummary};
pub use registry::Registry;
pub use session::Session;
pub use sinks::Sink;
pub use sources::{Source, SourceKind, SourceQuery};
