//! Typed queue operations over the envelope client

use std::collections::BTreeMap;
use std::sync::Arc;

use classad_lite::{Expr, Value};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::job::{ItemData, JobDescription, JobId, JobRecord, SubmissionResult};
use crate::protocol::payloads::{
    ActRequest, ActResponse, EditRequest, EnqueueRequest, EnqueueResponse, FetchTokenRequest,
    FetchTokenResponse, QueryRequest, QueryResponse, RetrieveRequest, SpoolRequest, SpoolResponse,
    TokenRequest, TokenRequestResponse, TransactionRef,
};
use crate::protocol::{EditOutcome, JobAction, Operation, StreamMetadata};
use crate::spool::bundle::{sha256_hex, InputBundle};

use super::collector::ScheddAddress;
use super::rpc::{RetryPolicy, RpcClient, RpcError, RpcResult};
use super::transport::Transport;

/// Attributes every projection carries so records can be identified
pub const IDENTITY_ATTRIBUTES: [&str; 3] = ["ClusterId", "ProcId", "JobStatus"];

/// Client for one located queue
pub struct ScheddClient {
    rpc: RpcClient,
    address: ScheddAddress,
}

impl std::fmt::Debug for ScheddClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheddClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ScheddClient {
    pub fn new(transport: Arc<dyn Transport>, address: ScheddAddress, retry: RetryPolicy) -> Self {
        Self {
            rpc: RpcClient::new(transport, retry),
            address,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.rpc = self.rpc.with_cancel(cancel);
        self
    }

    pub fn address(&self) -> &ScheddAddress {
        &self.address
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.rpc.cancel_token()
    }

    /// Open a transaction. It is aborted on drop unless committed.
    pub fn transaction(&self) -> RpcResult<Transaction<'_>> {
        let opened: TransactionRef = self.rpc.call(Operation::BeginTransaction, &serde_json::json!({}))?;
        debug!(transaction = %opened.transaction_id, schedd = %self.address.name, "transaction opened");
        Ok(Transaction {
            client: self,
            id: opened.transaction_id,
            finished: false,
        })
    }

    /// Upload one instance's input archive; a verified spool releases the job
    pub fn spool_one(&self, bundle: &InputBundle) -> RpcResult<SpoolResponse> {
        let header = SpoolRequest {
            job_id: bundle.job_id,
            content_length: bundle.archive.len() as u64,
            content_sha256: bundle.content_sha256.clone(),
            manifest_digest: bundle.manifest_digest.clone(),
        };
        let spooled: SpoolResponse = self.rpc.call_framed(Operation::Spool, &header, &bundle.archive)?;
        debug!(job = %bundle.job_id, files = spooled.files.len(), bytes = header.content_length, "spooled");
        Ok(spooled)
    }

    /// Records matching `constraint`, projected onto `projection` plus the
    /// identity attributes. An empty projection returns every attribute.
    pub fn query(&self, constraint: &Expr, projection: &[&str]) -> RpcResult<Vec<JobRecord>> {
        let mut attributes: Vec<String> = Vec::new();
        if !projection.is_empty() {
            for name in IDENTITY_ATTRIBUTES.iter().chain(projection.iter()) {
                if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                    attributes.push(name.to_string());
                }
            }
        }
        let request = QueryRequest {
            constraint: constraint.to_string(),
            projection: attributes,
        };
        let response: QueryResponse = self.rpc.call(Operation::Query, &request)?;
        debug!(constraint = %request.constraint, records = response.records.len(), "query");

        response
            .records
            .into_iter()
            .map(|attributes: BTreeMap<String, Value>| {
                JobRecord::from_attributes(attributes)
                    .map_err(|e| RpcError::Protocol(format!("malformed record: {}", e)))
            })
            .collect()
    }

    /// Download one job's output archive and check it against its metadata
    pub fn fetch_output(&self, job_id: JobId) -> RpcResult<Vec<u8>> {
        let (metadata, archive): (StreamMetadata, Vec<u8>) =
            self.rpc.call_fetch(Operation::Retrieve, &RetrieveRequest { job_id })?;

        if archive.len() as u64 != metadata.content_length {
            return Err(RpcError::TransferFailed(format!(
                "job {}: expected {} bytes, received {}",
                job_id,
                metadata.content_length,
                archive.len()
            )));
        }
        let actual = sha256_hex(&archive);
        if actual != metadata.content_sha256 {
            return Err(RpcError::TransferFailed(format!(
                "job {}: checksum mismatch (expected {}, got {})",
                job_id, metadata.content_sha256, actual
            )));
        }
        Ok(archive)
    }

    /// Set `attribute` on every record matching `constraint`
    pub fn edit(&self, constraint: &Expr, attribute: &str, value: Value) -> RpcResult<EditOutcome> {
        self.edit_where(constraint, None, attribute, value)
    }

    /// Conditional edit: records matching `constraint` are counted, and only
    /// those also satisfying `only_if` are changed. The queue applies the
    /// guard and the write as one step.
    pub fn edit_where(
        &self,
        constraint: &Expr,
        only_if: Option<&Expr>,
        attribute: &str,
        value: Value,
    ) -> RpcResult<EditOutcome> {
        let request = EditRequest {
            constraint: constraint.to_string(),
            attribute: attribute.to_string(),
            value,
            only_if: only_if.map(Expr::to_string),
        };
        let outcome: EditOutcome = self.rpc.call(Operation::Edit, &request)?;
        debug!(
            attribute,
            matched = outcome.matched,
            edited = outcome.edited,
            "edit"
        );
        Ok(outcome)
    }

    /// Apply a queue action; returns the number of records affected
    pub fn act(&self, constraint: &Expr, action: JobAction) -> RpcResult<u64> {
        let request = ActRequest {
            constraint: constraint.to_string(),
            action,
        };
        let response: ActResponse = self.rpc.call(Operation::Act, &request)?;
        info!(action = action.as_str(), affected = response.affected, "queue action");
        Ok(response.affected)
    }

    pub fn request_token(&self, identity: &str, authorizations: &[String]) -> RpcResult<String> {
        let request = TokenRequest {
            identity: identity.to_string(),
            authorizations: authorizations.to_vec(),
            schedd: Some(self.address.name.clone()),
        };
        let response: TokenRequestResponse = self.rpc.call(Operation::RequestToken, &request)?;
        Ok(response.request_id)
    }

    /// Fetch an approved token. An unapproved request fails with `Pending`.
    pub fn fetch_token(&self, request_id: &str) -> RpcResult<String> {
        let request = FetchTokenRequest {
            request_id: request_id.to_string(),
        };
        let response: FetchTokenResponse = self.rpc.call(Operation::FetchToken, &request)?;
        Ok(response.token)
    }
}

/// An open queue transaction
pub struct Transaction<'a> {
    client: &'a ScheddClient,
    id: String,
    finished: bool,
}

impl Transaction<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stage `count` instances of `description`
    pub fn enqueue(
        &self,
        description: &JobDescription,
        count: usize,
        item_data: &ItemData,
    ) -> RpcResult<SubmissionResult> {
        let request = EnqueueRequest {
            transaction_id: self.id.clone(),
            description: description.clone(),
            count,
            item_data: item_data.clone(),
        };
        let response: EnqueueResponse = self.client.rpc.call(Operation::Enqueue, &request)?;
        Ok(SubmissionResult {
            cluster_id: response.cluster_id,
            num_procs: response.num_procs,
        })
    }

    /// Make the staged jobs visible. On failure the transaction is aborted.
    pub fn commit(mut self) -> RpcResult<()> {
        let _: serde_json::Value = self.client.rpc.call(Operation::Commit, &self.reference())?;
        self.finished = true;
        debug!(transaction = %self.id, "committed");
        Ok(())
    }

    pub fn abort(mut self) -> RpcResult<()> {
        self.finished = true;
        let _: serde_json::Value = self.client.rpc.call(Operation::Abort, &self.reference())?;
        debug!(transaction = %self.id, "aborted");
        Ok(())
    }

    fn reference(&self) -> TransactionRef {
        TransactionRef {
            transaction_id: self.id.clone(),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(transaction = %self.id, "transaction not committed, aborting");
        let result: RpcResult<serde_json::Value> =
            self.client.rpc.call(Operation::Abort, &self.reference());
        if let Err(e) = result {
            warn!(transaction = %self.id, error = %e, "abort failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{materialize, ClusterId, JobStatus};
    use crate::mock::{FailureConfig, DEFAULT_SCHEDD_NAME};
    use crate::retention::RetentionPolicy;
    use crate::schedd::MockTransport;
    use crate::spool::bundle::InputBundler;
    use std::time::Duration;

    fn setup() -> (Arc<MockTransport>, ScheddClient) {
        let transport = Arc::new(MockTransport::new());
        let address = ScheddAddress {
            name: DEFAULT_SCHEDD_NAME.to_string(),
            address: "<127.0.0.1:9618>".to_string(),
        };
        let retry = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let client = ScheddClient::new(transport.clone(), address, retry);
        (transport, client)
    }

    fn description() -> JobDescription {
        let mut description = JobDescription::new();
        description.set("executable", "/bin/cat");
        description.set("hold", "true");
        description
    }

    fn submit(client: &ScheddClient, count: usize) -> SubmissionResult {
        let txn = client.transaction().unwrap();
        let result = txn.enqueue(&description(), count, &Vec::new()).unwrap();
        txn.commit().unwrap();
        result
    }

    #[test]
    fn test_debug_shows_address() {
        let (_transport, client) = setup();
        let rendered = format!("{:?}", client);
        assert!(rendered.starts_with("ScheddClient"));
        assert!(rendered.contains(DEFAULT_SCHEDD_NAME));
    }

    #[test]
    fn test_transaction_commit() {
        let (transport, client) = setup();
        let result = submit(&client, 3);

        assert_eq!(result.num_procs, 3);
        let records = client.query(&result.cluster_id.constraint(), &["Owner"]).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == JobStatus::Held));
        assert_eq!(transport.schedd().calls(Operation::Abort), 0);
    }

    #[test]
    fn test_uncommitted_transaction_aborts_on_drop() {
        let (transport, client) = setup();
        {
            let txn = client.transaction().unwrap();
            txn.enqueue(&description(), 2, &Vec::new()).unwrap();
        }
        assert_eq!(transport.schedd().calls(Operation::Abort), 1);
        assert!(transport.schedd().job_ids().is_empty());
        assert_eq!(transport.schedd().open_transactions(), 0);
    }

    #[test]
    fn test_failed_commit_aborts_and_is_not_retried() {
        let (transport, client) = setup();
        transport
            .schedd()
            .inject_failure(Operation::Commit, FailureConfig::busy(1).with_fail_count(1));

        let txn = client.transaction().unwrap();
        txn.enqueue(&description(), 1, &Vec::new()).unwrap();
        assert!(matches!(txn.commit(), Err(RpcError::Busy { .. })));

        assert_eq!(transport.schedd().calls(Operation::Commit), 1);
        assert_eq!(transport.schedd().calls(Operation::Abort), 1);
        assert!(transport.schedd().job_ids().is_empty());
    }

    #[test]
    fn test_query_projection_includes_identity() {
        let (_transport, client) = setup();
        let result = submit(&client, 1);
        let records = client
            .query(&result.cluster_id.constraint(), &["LeaveJobInQueue"])
            .unwrap();
        let record = &records[0];
        assert_eq!(record.id, JobId::new(result.cluster_id, 0));
        assert!(record.get("Executable").is_none());
    }

    #[test]
    fn test_spool_then_fetch_output() {
        let (transport, client) = setup();
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("in.txt"), b"payload").unwrap();

        let mut desc = description();
        desc.set("transfer_input_files", "in.txt");
        // completed records are purged unless the policy retains them
        RetentionPolicy::default().apply(&mut desc);
        let txn = client.transaction().unwrap();
        let result = txn.enqueue(&desc, 1, &Vec::new()).unwrap();
        txn.commit().unwrap();

        let ads = materialize(&desc, 1, &Vec::new(), result.cluster_id);
        let bundle = InputBundler::new(dir.path()).bundle(&ads[0]).unwrap();
        let spooled = client.spool_one(&bundle).unwrap();
        assert_eq!(spooled.files, vec!["in.txt".to_string()]);

        let job = JobId::new(result.cluster_id, 0);
        assert!(matches!(client.fetch_output(job), Err(RpcError::TransferFailed(_))));

        transport.schedd().complete_job(job);
        let archive = client.fetch_output(job).unwrap();
        let files = crate::spool::bundle::read_archive(&archive).unwrap();
        assert_eq!(files[crate::remap::STDOUT_NAME], b"payload".to_vec());
    }

    #[test]
    fn test_edit_where_guard() {
        let (_transport, client) = setup();
        let result = submit(&client, 2);
        let constraint = result.cluster_id.constraint();
        let guard = Expr::attr("Claim").is_undefined();

        let first = client
            .edit_where(&constraint, Some(&guard), "Claim", Value::Str("a".into()))
            .unwrap();
        assert_eq!(first, EditOutcome { matched: 2, edited: 2 });

        let second = client
            .edit_where(&constraint, Some(&guard), "Claim", Value::Str("b".into()))
            .unwrap();
        assert_eq!(second, EditOutcome { matched: 2, edited: 0 });
    }

    #[test]
    fn test_act_remove() {
        let (transport, client) = setup();
        let result = submit(&client, 2);
        let affected = client
            .act(&result.cluster_id.constraint(), JobAction::Remove)
            .unwrap();
        assert_eq!(affected, 2);
        assert!(transport.schedd().job_ids().is_empty());
        assert!(client
            .query(&ClusterId(result.cluster_id.0).constraint(), &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fetch_token_pending_until_approved() {
        let (transport, client) = setup();
        let id = client.request_token("alice@pool", &["READ".to_string()]).unwrap();
        assert!(matches!(client.fetch_token(&id), Err(RpcError::Pending(_))));

        transport.schedd().approve_token(&id);
        assert!(client.fetch_token(&id).unwrap().starts_with("mock."));
    }
}
