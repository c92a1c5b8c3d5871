//! Submit-spool-retrieve protocol
//!
//! - bundle: deterministic input archives and their manifests
//! - submit: enqueue on hold, then spool each instance
//! - retrieve: claim, fetch and mark completed records
//!
//! [`run_cycle`] drives all three with a completion wait in between.

pub mod bundle;
pub mod retrieve;
pub mod submit;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SpoolConfig;
use crate::error::SpoolError;
use crate::job::{ClusterId, ItemData, JobDescription};
use crate::poll::{CompletionPoller, PollOutcome};
use crate::schedd::ScheddClient;
use crate::summary::{ExitCode, InstanceOutcome, RunOutcome, RunSummary};

pub use bundle::{InputBundle, InputBundler};
pub use retrieve::{RetrievalClient, RetrieveReport, RetrieveStatus};
pub use submit::{SubmissionClient, SubmitReport};

/// How a full cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTerminal {
    /// Outputs were retrieved (possibly partially)
    Retrieved,
    /// Nothing was spooled, so there was nothing to wait for
    NothingSpooled,
    /// The records left the queue before completing
    Vanished,
    /// Another retrieval owns the records
    AlreadyClaimed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cluster_id: ClusterId,
    pub terminal: CycleTerminal,
    pub submit: SubmitReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve: Option<RetrieveReport>,
    /// Queries issued while waiting for completion
    pub queries: u32,
}

impl CycleReport {
    /// Per-instance results: retrieval results where available, spool
    /// failures otherwise
    pub fn instances(&self) -> Vec<InstanceOutcome> {
        let retrieved = self
            .retrieve
            .as_ref()
            .map(|r| r.instances.clone())
            .unwrap_or_default();
        let mut instances: Vec<InstanceOutcome> = self
            .submit
            .instances
            .iter()
            .filter(|i| !i.is_success())
            .cloned()
            .collect();
        instances.extend(retrieved);
        instances.sort_by_key(|i| i.job_id);
        instances
    }

    pub fn summary(&self, duration_ms: u64) -> RunSummary {
        let summary = RunSummary::from_instances("run", Some(self.cluster_id), self.instances(), duration_ms);
        match self.terminal {
            CycleTerminal::Retrieved | CycleTerminal::NothingSpooled => summary,
            CycleTerminal::Vanished | CycleTerminal::AlreadyClaimed => {
                summary.with_outcome(RunOutcome::Failed, ExitCode::Transfer)
            }
        }
    }
}

/// Submit, wait for completion, and retrieve, using `config` for timings,
/// directories and retention
pub fn run_cycle(
    client: &ScheddClient,
    config: &SpoolConfig,
    description: &JobDescription,
    count: usize,
    item_data: &ItemData,
) -> Result<CycleReport, SpoolError> {
    let submitter = SubmissionClient::new(client, InputBundler::new(&config.input_dir), config.retention());
    let submit = submitter.submit(description, count, item_data)?;
    let cluster_id = submit.cluster_id;

    let spooled = submit.spooled();
    if spooled.is_empty() {
        warn!(cluster = %cluster_id, "no instance was spooled, skipping wait");
        return Ok(CycleReport {
            cluster_id,
            terminal: CycleTerminal::NothingSpooled,
            submit,
            retrieve: None,
            queries: 0,
        });
    }

    // Instances that failed to spool stay held and never complete
    let constraint = classad_lite::Expr::any(spooled.iter().map(|id| id.constraint()));
    let mut poller = CompletionPoller::from_timings(client, &config.timings());
    let outcome = poller.await_completion(&constraint)?;
    let queries = poller.queries_issued();

    if outcome == PollOutcome::Vanished {
        warn!(cluster = %cluster_id, "jobs left the queue before completing");
        return Ok(CycleReport {
            cluster_id,
            terminal: CycleTerminal::Vanished,
            submit,
            retrieve: None,
            queries,
        });
    }

    let retriever = RetrievalClient::new(
        client,
        &config.output_dir,
        config.retrieved_marker.clone(),
        config.retrieve_policy(),
    );
    let retrieve = retriever.retrieve(&constraint, config.remove_after_retrieve)?;
    let terminal = match retrieve.status {
        RetrieveStatus::Retrieved => CycleTerminal::Retrieved,
        RetrieveStatus::AlreadyClaimed => CycleTerminal::AlreadyClaimed,
        RetrieveStatus::NothingToRetrieve => CycleTerminal::Vanished,
    };
    info!(cluster = %cluster_id, ?terminal, queries, "cycle finished");

    Ok(CycleReport {
        cluster_id,
        terminal,
        submit,
        retrieve: Some(retrieve),
        queries,
    })
}
