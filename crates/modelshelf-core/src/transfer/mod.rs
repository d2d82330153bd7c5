//! Background downloads into the library.
//!
//! Callers build [`JobRequest`]s, hand them to the [`TransferEngine`] and
//! poll [`JobSnapshot`]s until the engine stops running. Images are
//! normalized to PNG on arrival.

mod engine;
pub mod image;
mod job;
mod progress;

pub use engine::TransferEngine;
pub use job::{DownloadJob, JobId, JobRequest, JobSnapshot, JobStatus, JobTarget};
pub use progress::{estimate_remaining, Throughput};
