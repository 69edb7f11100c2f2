//! ppescan: client library for a PPE detection image-analysis service.
//!
//! Wraps the service's HTTP API with a typed async client and the
//! data-orchestration that a frontend needs around it: staged batch
//! uploads with validation, previews and per-file reconciliation, and
//! exhaustive paged fetches feeding timezone-correct analytics rollups.

pub mod analytics;
pub mod client;
pub mod config;
pub mod models;
pub mod sinks;
pub mod timeframe;
pub mod upload;

pub use analytics::{summarize, AggregateSnapshot};
pub use client::paging::{fetch_exhaustive, ImageFilter, Page, PageSource, PageWindow};
pub use client::{ApiClient, ApiError};
pub use config::{load_settings, SessionContext, Settings};
pub use models::{Detection, ImagePage, ImageRecord};
pub use timeframe::{normalize_range, InstantRange};
pub use upload::{CandidateFile, CommitSummary, UploadSession, UploadStatus};
