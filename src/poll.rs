//! Completion polling
//!
//! Repeatedly queries the queue until every matching record is completed,
//! the records vanish, the deadline passes, or the run is cancelled.

use std::time::Duration;

use classad_lite::Expr;
use tracing::{debug, info, warn};

use crate::error::SpoolError;
use crate::job::{JobRecord, JobStatus};
use crate::schedd::{RpcError, ScheddClient};
use crate::timeout::{Deadline, WaitTimings};

/// How a wait ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every matching record reached Completed
    Completed(Vec<JobRecord>),
    /// Nothing matches any more; the records were removed or purged
    Vanished,
}

pub struct CompletionPoller<'a> {
    client: &'a ScheddClient,
    interval: Duration,
    deadline: Option<Duration>,
    queries_issued: u32,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(client: &'a ScheddClient, interval: Duration) -> Self {
        Self {
            client,
            interval,
            deadline: None,
            queries_issued: 0,
        }
    }

    pub fn from_timings(client: &'a ScheddClient, timings: &WaitTimings) -> Self {
        Self::new(client, timings.poll_interval())
            .with_deadline(timings.deadline_seconds.map(Duration::from_secs))
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn queries_issued(&self) -> u32 {
        self.queries_issued
    }

    /// Wait until every record matching `constraint` is completed
    pub fn await_completion(&mut self, constraint: &Expr) -> Result<PollOutcome, SpoolError> {
        let deadline = Deadline::new(self.deadline);
        let cancel = self.client.cancel_token().clone();

        loop {
            cancel.check().map_err(|_| SpoolError::Cancelled)?;
            if deadline.is_expired() {
                warn!(constraint = %constraint, queries = self.queries_issued, "deadline passed");
                return Err(SpoolError::TimedOut {
                    waited_seconds: deadline.elapsed().as_secs(),
                });
            }

            cancel
                .sleep(deadline.truncate(self.interval))
                .map_err(|_| SpoolError::Cancelled)?;

            self.queries_issued += 1;
            let records = match self.client.query(constraint, &["JobStatus"]) {
                Ok(records) => records,
                Err(RpcError::Cancelled) => return Err(SpoolError::Cancelled),
                Err(e) => {
                    warn!(error = %e, query = self.queries_issued, "status query failed");
                    continue;
                }
            };

            if records.is_empty() {
                info!(constraint = %constraint, "no matching records left");
                return Ok(PollOutcome::Vanished);
            }

            let completed = records
                .iter()
                .filter(|r| r.status == JobStatus::Completed)
                .count();
            debug!(
                query = self.queries_issued,
                completed,
                total = records.len(),
                "poll"
            );
            if completed == records.len() {
                info!(jobs = completed, queries = self.queries_issued, "all jobs completed");
                return Ok(PollOutcome::Completed(records));
            }
        }
    }
}
