//! Active download tracking for the panel.
//!
//! The backend owns the downloads; this module keeps a local, deduplicated
//! copy of them in sync through:
//! - push events (one payload per state change)
//! - a polling fallback that re-fetches the full list with backoff

mod backoff;
pub mod format;
pub mod record;
mod tracker;
pub mod view;

pub use backoff::Backoff;
pub use record::{normalize, normalize_value, DownloadRecord, DownloadStatus, RawDownload};
pub use tracker::{CommandOutcome, DownloadList, DownloadStateTracker};
