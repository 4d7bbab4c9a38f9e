//! The ingestion pipeline.
//!
//! Each pass lists the registered outlets and, per outlet, fetches the feed,
//! compares the channel update time with the outlet's watermark
//! ([`change`]), turns new entries into articles ([`Reconciler`]) and then
//! advances the watermark. The [`Scheduler`] repeats that pass on a fixed
//! interval; [`register_outlet`] adds new outlets.

pub mod change;
mod orchestrator;
mod reconciler;
mod registry;
mod scheduler;

pub use change::Decision;
pub use orchestrator::{IngestError, Ingestor, OutletOutcome, RunSummary, DEFAULT_CONCURRENCY};
pub use reconciler::{
    EntryError, EntryReconciliationError, Reconciler, Reconciliation, SkippedEntry,
};
pub use registry::{register_outlet, validate_feed_url, RegistrationError};
pub use scheduler::{Job, Scheduler};
