//! Retrieval: claim completed records, fetch their outputs once, mark them

use std::fs;
use std::path::{Path, PathBuf};

use classad_lite::{Expr, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SpoolError, Stage};
use crate::job::{ClusterId, JobRecord};
use crate::protocol::JobAction;
use crate::remap::RemapList;
use crate::schedd::{RetryPolicy, RpcError, ScheddClient};
use crate::summary::{InstanceOutcome, OutcomeAggregator, RunOutcome, RunSummary};

use super::bundle::{read_archive, safe_relative_path, BundleError};

/// Attribute holding the id of the retrieval that owns a record
pub const CLAIM_ATTRIBUTE: &str = "RetrievalClaim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveStatus {
    /// Outputs were fetched for the claimed records
    Retrieved,
    /// Records exist but another retrieval owns them or already finished
    AlreadyClaimed,
    /// No record matched
    NothingToRetrieve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveReport {
    pub status: RetrieveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
    pub instances: Vec<InstanceOutcome>,
    pub outcome: RunOutcome,
    /// Records removed from the queue afterwards
    pub removed: u64,
}

impl RetrieveReport {
    fn skipped(status: RetrieveStatus) -> Self {
        Self {
            status,
            claim: None,
            instances: Vec::new(),
            outcome: RunOutcome::Success,
            removed: 0,
        }
    }

    pub fn summary(&self, command: &str, cluster_id: Option<ClusterId>, duration_ms: u64) -> RunSummary {
        match self.status {
            RetrieveStatus::Retrieved => {
                RunSummary::from_instances(command, cluster_id, self.instances.clone(), duration_ms)
            }
            RetrieveStatus::AlreadyClaimed => RunSummary::success(
                command,
                cluster_id,
                "outputs already claimed by another retrieval",
                duration_ms,
            ),
            RetrieveStatus::NothingToRetrieve => {
                RunSummary::success(command, cluster_id, "nothing to retrieve", duration_ms)
            }
        }
    }
}

/// Fetches outputs of completed jobs into a local directory
pub struct RetrievalClient<'a> {
    client: &'a ScheddClient,
    output_dir: PathBuf,
    retrieved_marker: String,
    retry: RetryPolicy,
}

impl<'a> RetrievalClient<'a> {
    pub fn new(
        client: &'a ScheddClient,
        output_dir: impl Into<PathBuf>,
        retrieved_marker: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            retrieved_marker: retrieved_marker.into(),
            retry,
        }
    }

    /// Retrieve every unretrieved record matching `constraint`.
    ///
    /// The records are claimed first with a conditional edit, so concurrent
    /// retrievals of the same records transfer each output at most once.
    /// Records whose output was written are marked one by one; the claim on
    /// every record left unmarked is released for a later attempt.
    pub fn retrieve(&self, constraint: &Expr, remove: bool) -> Result<RetrieveReport, SpoolError> {
        let query_error = |e: RpcError| SpoolError::remote(Stage::Query, e);

        let claim = Uuid::new_v4().to_string();
        let ours = Expr::attr(CLAIM_ATTRIBUTE).is(Expr::string(claim.as_str()));
        // a replayed claim edit finds our own id already in place
        let claimable = Expr::attr(&self.retrieved_marker)
            .is_not(Expr::boolean(true))
            .and(Expr::attr(CLAIM_ATTRIBUTE).is_undefined().or(ours.clone()));
        let claimed = self
            .client
            .edit_where(constraint, Some(&claimable), CLAIM_ATTRIBUTE, Value::Str(claim.clone()))
            .map_err(query_error)?;

        if claimed.edited == 0 {
            let status = if claimed.matched > 0 {
                RetrieveStatus::AlreadyClaimed
            } else {
                RetrieveStatus::NothingToRetrieve
            };
            info!(constraint = %constraint, matched = claimed.matched, ?status, "nothing claimed");
            return Ok(RetrieveReport::skipped(status));
        }
        debug!(claim = %claim, records = claimed.edited, "claimed records");

        let owned = constraint.clone().and(ours);
        let records = match self.client.query(&owned, &["TransferOutputRemaps"]) {
            Ok(records) => records,
            Err(e) => {
                self.release(&owned, &claim);
                return Err(query_error(e));
            }
        };

        let mut instances: Vec<InstanceOutcome> = records.iter().map(|r| self.retrieve_one(r)).collect();
        let marked = self.mark_retrieved(&owned, &claim, &mut instances);

        let unfinished = instances.iter().filter(|i| !i.is_success()).count();
        if unfinished > 0 {
            warn!(claim = %claim, failed = unfinished, "retrieval incomplete, releasing claim");
            self.release(&owned, &claim);
        }

        let mut removed = 0;
        if remove && marked > 0 {
            let retrieved = owned
                .clone()
                .and(Expr::attr(&self.retrieved_marker).is(Expr::boolean(true)));
            match self.client.act(&retrieved, JobAction::Remove) {
                Ok(n) => removed = n,
                Err(e) => warn!(claim = %claim, error = %e, "cannot remove retrieved records"),
            }
        }

        let mut aggregator = OutcomeAggregator::new();
        for instance in &instances {
            aggregator.add(instance.failure_kind);
        }
        info!(claim = %claim, retrieved = marked, failed = aggregator.failed(), "retrieval finished");

        Ok(RetrieveReport {
            status: RetrieveStatus::Retrieved,
            claim: Some(claim),
            outcome: aggregator.outcome(),
            instances,
            removed,
        })
    }

    /// Mark the records whose output was written. When the edit fails those
    /// instances are reported as failed so their claim is released too.
    fn mark_retrieved(&self, owned: &Expr, claim: &str, instances: &mut [InstanceOutcome]) -> usize {
        let written: Vec<Expr> = instances
            .iter()
            .filter(|i| i.is_success())
            .map(|i| i.job_id.constraint())
            .collect();
        if written.is_empty() {
            return 0;
        }
        let count = written.len();
        let target = owned.clone().and(Expr::any(written));

        match self.client.edit(&target, &self.retrieved_marker, Value::Bool(true)) {
            Ok(_) => count,
            Err(e) => {
                let err = SpoolError::remote(Stage::Query, e);
                warn!(claim = %claim, error = %err, "cannot mark records retrieved");
                for instance in instances.iter_mut().filter(|i| i.is_success()) {
                    *instance = InstanceOutcome::failure(
                        instance.job_id,
                        err.failure_kind(),
                        format!("output written but not marked retrieved: {}", err),
                    );
                }
                0
            }
        }
    }

    /// Drop our claim from every owned record not yet marked retrieved
    fn release(&self, owned: &Expr, claim: &str) {
        let unmarked = owned
            .clone()
            .and(Expr::attr(&self.retrieved_marker).is_not(Expr::boolean(true)));
        if let Err(e) = self.client.edit(&unmarked, CLAIM_ATTRIBUTE, Value::Undefined) {
            warn!(claim = %claim, error = %e, "cannot release claim");
        }
    }

    fn retrieve_one(&self, record: &JobRecord) -> InstanceOutcome {
        let result = self
            .fetch_with_retry(record)
            .and_then(|archive| self.unpack(record, &archive));
        match result {
            Ok(files) => {
                debug!(job = %record.id, files = files.len(), "output written");
                InstanceOutcome::success(record.id, files)
            }
            Err(e) => {
                warn!(job = %record.id, error = %e, "retrieve failed");
                InstanceOutcome::failure(record.id, e.failure_kind(), e.to_string())
            }
        }
    }

    fn fetch_with_retry(&self, record: &JobRecord) -> Result<Vec<u8>, SpoolError> {
        let mut attempt = 0;
        loop {
            match self.client.fetch_output(record.id) {
                Ok(archive) => return Ok(archive),
                Err(RpcError::TransferFailed(message)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff(attempt);
                    warn!(job = %record.id, attempt, error = %message, "output fetch failed, retrying");
                    self.client
                        .cancel_token()
                        .sleep(delay)
                        .map_err(|_| SpoolError::Cancelled)?;
                }
                Err(e) => return Err(SpoolError::remote(Stage::Transfer, e)),
            }
        }
    }

    /// Write each archive entry under its remapped local name
    fn unpack(&self, record: &JobRecord, archive: &[u8]) -> Result<Vec<String>, SpoolError> {
        let remaps = RemapList::parse(record.get_str("TransferOutputRemaps").unwrap_or(""))
            .map_err(|e| SpoolError::Transfer(format!("job {}: {}", record.id, e)))?;
        let files = read_archive(archive)?;

        let mut written = Vec::with_capacity(files.len());
        for (name, content) in &files {
            let local = remaps.resolve(name);
            let relative = safe_relative_path(local)?;
            write_output(&self.output_dir.join(&relative), content)?;
            written.push(relative.to_string_lossy().to_string());
        }
        Ok(written)
    }
}

fn write_output(path: &Path, content: &[u8]) -> Result<(), BundleError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
