//! Dataset Reconciler - turns heterogeneous dataset-analysis payloads into one
//! canonical report.
//!
//! Payloads arrive from an asynchronous analysis job API or from a
//! content-addressed gateway in several JSON shapes. Each is classified once, run
//! through a per-field extraction cascade and assembled into a
//! [`report::CanonicalDatasetReport`] with every field present.

pub mod acquirer;
pub mod assembler;
pub mod attributes;
pub mod cascade;
pub mod client;
pub mod coerce;
pub mod config;
pub mod error;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod size_estimate;

pub use acquirer::{FallbackPolicy, JobSource, PollPolicy, ProgressStatus, ResultAcquirer};
pub use cascade::CompiledTables;
pub use error::{AcquireError, FetchError};
pub use pipeline::{reconcile, ContentSource, Reconciler};
pub use report::CanonicalDatasetReport;
