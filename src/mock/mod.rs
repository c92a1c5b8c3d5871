//! Mock job queue
//!
//! An in-process queue and pool directory that speaks the same envelope as
//! the real gateway. Used by unit and integration tests through
//! [`MockTransport`](crate::schedd::MockTransport).
//!
//! # Behaviour
//!
//! - Transactions are staged and only become visible on commit
//! - Enqueued jobs honour `hold`; a spool whose digests verify releases them
//! - Each matching query steps a released job through its scripted statuses
//! - Completed jobs get a `_condor_stdout` holding their concatenated inputs
//! - `LeaveJobInQueue` is evaluated to purge finished records
//! - Token requests stay pending until approved

mod failure;
mod schedd;
mod state;

pub use failure::{FailureConfig, FailureInjector};
pub use schedd::{MockSchedd, DEFAULT_SCHEDD_NAME};
pub use state::{QueueState, QueuedJob};
