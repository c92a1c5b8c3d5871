//! remote-spool - submit, spool and retrieve jobs on a remote job queue
//!
//! Jobs are enqueued on hold, their local inputs are staged ("spooled") to
//! the queue which releases them, completion is polled for, and outputs are
//! retrieved exactly once before the records are marked and optionally
//! removed. A retention policy keeps completed records queued until their
//! outputs have been retrieved.

pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod mock;
pub mod poll;
pub mod protocol;
pub mod remap;
pub mod retention;
pub mod schedd;
pub mod spool;
pub mod summary;
pub mod timeout;
pub mod token;

pub use cancel::CancelToken;
pub use config::{EffectiveConfig, SpoolConfig};
pub use error::SpoolError;
pub use job::{ClusterId, ItemData, JobDescription, JobId, JobRecord, JobStatus};
pub use poll::{CompletionPoller, PollOutcome};
pub use schedd::{connect, Collector, ScheddClient};
pub use spool::{run_cycle, CycleReport, RetrievalClient, SubmissionClient};
