//! Submission: enqueue on hold, then spool each instance's inputs

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SpoolError, Stage};
use crate::job::{
    materialize, validate_item_data, ClusterId, ItemData, JobAd, JobDescription, JobId,
    SubmissionResult,
};
use crate::remap::rewrite_remaps;
use crate::retention::RetentionPolicy;
use crate::schedd::{RpcError, ScheddClient};
use crate::summary::{FailureKind, InstanceOutcome, OutcomeAggregator, RunOutcome, RunSummary};

use super::bundle::InputBundler;

/// Hold reason code the queue uses for jobs waiting on spooled input
pub const SPOOLING_HOLD_REASON_CODE: i64 = 16;

pub const SPOOLING_HOLD_REASON: &str = "Spooling input files";

/// Result of one submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReport {
    pub cluster_id: ClusterId,
    pub num_procs: usize,
    pub instances: Vec<InstanceOutcome>,
    pub outcome: RunOutcome,
}

impl SubmitReport {
    fn new(result: SubmissionResult, instances: Vec<InstanceOutcome>) -> Self {
        let mut aggregator = OutcomeAggregator::new();
        for instance in &instances {
            aggregator.add(instance.failure_kind);
        }
        Self {
            cluster_id: result.cluster_id,
            num_procs: result.num_procs,
            outcome: aggregator.outcome(),
            instances,
        }
    }

    /// Instances whose inputs reached the queue
    pub fn spooled(&self) -> Vec<JobId> {
        self.instances
            .iter()
            .filter(|i| i.is_success())
            .map(|i| i.job_id)
            .collect()
    }

    pub fn summary(&self, command: &str, duration_ms: u64) -> RunSummary {
        RunSummary::from_instances(command, Some(self.cluster_id), self.instances.clone(), duration_ms)
    }
}

/// Submits job arrays to one queue
pub struct SubmissionClient<'a> {
    client: &'a ScheddClient,
    bundler: InputBundler,
    retention: RetentionPolicy,
}

impl<'a> SubmissionClient<'a> {
    pub fn new(client: &'a ScheddClient, bundler: InputBundler, retention: RetentionPolicy) -> Self {
        Self {
            client,
            bundler,
            retention,
        }
    }

    /// Submit `count` instances and spool their inputs.
    ///
    /// Item data is validated before the queue is contacted. The enqueue is
    /// all-or-nothing; spool failures are recorded per instance.
    pub fn submit(
        &self,
        description: &JobDescription,
        count: usize,
        item_data: &ItemData,
    ) -> Result<SubmitReport, SpoolError> {
        let expected = validate_item_data(count, item_data)?;
        let prepared = self.prepare(description)?;

        let result = self.enqueue(&prepared, count, item_data, expected)?;
        info!(
            cluster = %result.cluster_id,
            procs = result.num_procs,
            schedd = %self.client.address().name,
            "submitted on hold"
        );

        let ads = materialize(&prepared, count, item_data, result.cluster_id);
        let cancel = self.client.cancel_token();
        let mut instances = Vec::with_capacity(ads.len());
        for ad in &ads {
            if cancel.is_cancelled() {
                instances.push(InstanceOutcome::failure(
                    ad.id,
                    FailureKind::Cancelled,
                    "cancelled before spool",
                ));
                continue;
            }
            instances.push(self.spool_instance(ad));
        }

        let report = SubmitReport::new(result, instances);
        match report.outcome {
            RunOutcome::Success => info!(cluster = %report.cluster_id, "all instances spooled"),
            _ => warn!(
                cluster = %report.cluster_id,
                spooled = report.spooled().len(),
                total = report.instances.len(),
                "some instances failed to spool"
            ),
        }
        Ok(report)
    }

    /// Copy of the description with the hold, retention and remap settings
    /// the protocol relies on
    pub fn prepare(&self, description: &JobDescription) -> Result<JobDescription, SpoolError> {
        let mut prepared = description.clone();
        prepared.set("hold", "true");
        prepared.set("My.HoldReason", format!("\"{}\"", SPOOLING_HOLD_REASON));
        prepared.set("My.HoldReasonCode", SPOOLING_HOLD_REASON_CODE.to_string());
        self.retention.apply(&mut prepared);

        let remaps = rewrite_remaps(
            description.get("transfer_output_remaps"),
            description.get("output"),
            description.get("error"),
        )?;
        if remaps != "\"\"" {
            prepared.set("transfer_output_remaps", remaps);
        }
        Ok(prepared)
    }

    fn enqueue(
        &self,
        description: &JobDescription,
        count: usize,
        item_data: &ItemData,
        expected: usize,
    ) -> Result<SubmissionResult, SpoolError> {
        let to_error = |e: RpcError| SpoolError::remote(Stage::Transaction, e);

        let txn = self.client.transaction().map_err(to_error)?;
        let result = txn.enqueue(description, count, item_data).map_err(to_error)?;
        if result.num_procs != expected {
            return Err(SpoolError::Submission(format!(
                "queue created {} instances, expected {}",
                result.num_procs, expected
            )));
        }
        txn.commit().map_err(to_error)?;
        Ok(result)
    }

    fn spool_instance(&self, ad: &JobAd) -> InstanceOutcome {
        let bundle = match self.bundler.bundle(ad) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(job = %ad.id, error = %e, "cannot bundle inputs");
                return InstanceOutcome::failure(ad.id, FailureKind::Transfer, e.to_string());
            }
        };
        if !bundle.skipped_urls.is_empty() {
            debug!(job = %ad.id, urls = ?bundle.skipped_urls, "left for the queue to fetch");
        }

        match self.client.spool_one(&bundle) {
            Ok(spooled) => InstanceOutcome::success(ad.id, spooled.files),
            Err(e) => {
                let err = SpoolError::remote(Stage::Transfer, e);
                warn!(job = %ad.id, error = %err, "spool failed");
                InstanceOutcome::failure(ad.id, err.failure_kind(), err.to_string())
            }
        }
    }
}
