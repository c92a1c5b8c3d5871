//! Mock queue implementation
//!
//! Answers every envelope operation from in-memory state. Test code keeps a
//! clone of the handle to script progressions, inject failures and inspect
//! the queue afterwards.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use classad_lite::{parse, Expr, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::job::{materialize, validate_item_data, JobId, JobStatus};
use crate::protocol::payloads::{
    ActRequest, ActResponse, EditOutcome, EditRequest, EnqueueRequest, EnqueueResponse,
    FetchTokenRequest, FetchTokenResponse, JobAction, LocateRequest, LocateResponse,
    QueryRequest, QueryResponse, RetrieveRequest, SpoolRequest, SpoolResponse, TokenRequest,
    TokenRequestResponse, TransactionRef,
};
use crate::protocol::{
    ErrorCode, Operation, QueueError, RpcErrorPayload, RpcRequest, RpcResponse, StreamMetadata,
    PROTOCOL_VERSION,
};
use crate::spool::bundle::{build_archive, manifest_for, read_archive, sha256_hex};

use super::failure::{FailureConfig, FailureInjector};
use super::state::{QueueState, QueuedJob, StagedTransaction, TokenRequestState};

/// Name the default queue registers under
pub const DEFAULT_SCHEDD_NAME: &str = "mock-schedd";

/// Attributes a client may not edit
const PROTECTED_ATTRIBUTES: &[&str] = &["ClusterId", "ProcId", "JobStatus"];

type Reply = (serde_json::Value, Option<Vec<u8>>);

/// In-process job queue and pool directory
#[derive(Clone)]
pub struct MockSchedd {
    state: Arc<Mutex<QueueState>>,
    failures: Arc<Mutex<FailureInjector>>,
    /// Queues the directory knows about; the first is the default
    registry: Arc<Mutex<Vec<LocateResponse>>>,
    default_progression: Arc<Mutex<Vec<JobStatus>>>,
    /// Per-job overrides of the progression
    progressions: Arc<Mutex<HashMap<JobId, VecDeque<JobStatus>>>>,
    /// Fixed clock; wall time when unset
    clock: Arc<Mutex<Option<i64>>>,
    calls: Arc<Mutex<HashMap<Operation, u64>>>,
    fetches: Arc<Mutex<HashMap<JobId, u64>>>,
    scripted_token_ids: Arc<Mutex<VecDeque<String>>>,
    /// Approve a token request once it has been fetched this many times
    auto_approve_after: Arc<Mutex<Option<u32>>>,
}

impl Default for MockSchedd {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSchedd {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
            registry: Arc::new(Mutex::new(vec![LocateResponse {
                name: DEFAULT_SCHEDD_NAME.to_string(),
                address: "<127.0.0.1:9618?sock=schedd>".to_string(),
            }])),
            default_progression: Arc::new(Mutex::new(vec![
                JobStatus::Running,
                JobStatus::Completed,
            ])),
            progressions: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(HashMap::new())),
            fetches: Arc::new(Mutex::new(HashMap::new())),
            scripted_token_ids: Arc::new(Mutex::new(VecDeque::new())),
            auto_approve_after: Arc::new(Mutex::new(None)),
        }
    }

    // === Test configuration ===

    pub fn register_schedd(&self, name: &str, address: &str) {
        self.registry.lock().unwrap().push(LocateResponse {
            name: name.to_string(),
            address: address.to_string(),
        });
    }

    /// Forget every registered queue
    pub fn clear_registry(&self) {
        self.registry.lock().unwrap().clear();
    }

    pub fn inject_failure(&self, op: Operation, config: FailureConfig) {
        self.failures.lock().unwrap().inject(op, config);
    }

    pub fn inject_error(&self, op: Operation, code: ErrorCode, message: &str) {
        self.failures.lock().unwrap().inject_error(op, code, message);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Statuses newly enqueued jobs step through, one per matching query
    pub fn set_default_progression(&self, states: Vec<JobStatus>) {
        *self.default_progression.lock().unwrap() = states;
    }

    pub fn set_progression(&self, job_id: JobId, states: Vec<JobStatus>) {
        self.progressions
            .lock()
            .unwrap()
            .insert(job_id, states.into_iter().collect());
    }

    pub fn set_clock(&self, now: i64) {
        *self.clock.lock().unwrap() = Some(now);
    }

    pub fn advance_clock(&self, seconds: i64) {
        let now = self.now();
        *self.clock.lock().unwrap() = Some(now + seconds);
    }

    /// Force a job to completion regardless of its progression
    pub fn complete_job(&self, job_id: JobId) -> bool {
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) => {
                job.complete(now);
                true
            }
            None => false,
        }
    }

    /// Request ids handed out by `request_token`, in order
    pub fn script_token_ids(&self, ids: Vec<String>) {
        self.scripted_token_ids.lock().unwrap().extend(ids);
    }

    pub fn approve_token(&self, request_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.token_requests.get_mut(request_id) {
            Some(request) => {
                request.approved = true;
                true
            }
            None => false,
        }
    }

    pub fn set_auto_approve_after(&self, fetches: Option<u32>) {
        *self.auto_approve_after.lock().unwrap() = fetches;
    }

    // === Inspection ===

    pub fn now(&self) -> i64 {
        let fixed = *self.clock.lock().unwrap();
        fixed.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    /// Requests received for an operation, including failed ones
    pub fn calls(&self, op: Operation) -> u64 {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Output archives served for a job
    pub fn fetch_count(&self, job_id: JobId) -> u64 {
        self.fetches.lock().unwrap().get(&job_id).copied().unwrap_or(0)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.state.lock().unwrap().jobs.keys().copied().collect()
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.state.lock().unwrap().jobs.get(&job_id).map(QueuedJob::status)
    }

    pub fn job_attribute(&self, job_id: JobId, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.jobs.get(&job_id).and_then(|job| job.get(name).cloned())
    }

    pub fn job_inputs(&self, job_id: JobId) -> Option<BTreeMap<String, Vec<u8>>> {
        let state = self.state.lock().unwrap();
        state.jobs.get(&job_id).map(|job| job.inputs.clone())
    }

    pub fn open_transactions(&self) -> usize {
        self.state.lock().unwrap().transactions.len()
    }

    pub fn token_request_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().token_requests.keys().cloned().collect()
    }

    // === Request handling ===

    pub fn handle_request(&self, request: &RpcRequest) -> RpcResponse {
        self.handle(request, None).0
    }

    /// Handle a request followed by an uploaded payload
    pub fn handle_framed(&self, request: &RpcRequest, content: &[u8]) -> RpcResponse {
        self.handle(request, Some(content)).0
    }

    /// Handle a request whose response carries a download payload
    pub fn handle_fetch(&self, request: &RpcRequest) -> (RpcResponse, Option<Vec<u8>>) {
        self.handle(request, None)
    }

    pub fn handle_json(&self, json_request: &str) -> Result<String, serde_json::Error> {
        let request: RpcRequest = serde_json::from_str(json_request)?;
        let response = self.handle_request(&request);
        serde_json::to_string(&response)
    }

    fn handle(&self, request: &RpcRequest, content: Option<&[u8]>) -> (RpcResponse, Option<Vec<u8>>) {
        *self.calls.lock().unwrap().entry(request.op).or_insert(0) += 1;
        let request_id = request.request_id.clone();

        if let Some(failure) = self.check_failure(&request.op) {
            if let Some(delay) = failure.delay {
                std::thread::sleep(delay);
            }
            if let Some(error) = failure.to_payload() {
                debug!(op = %request.op, code = %error.code, "injected failure");
                return (RpcResponse::error(request_id, error), None);
            }
        }

        if request.protocol_version != PROTOCOL_VERSION {
            let error = RpcErrorPayload::new(
                ErrorCode::InvalidRequest.as_str(),
                format!("unsupported protocol version {}", request.protocol_version),
            )
            .with_data("supported", serde_json::json!(PROTOCOL_VERSION));
            return (RpcResponse::error(request_id, error), None);
        }

        match self.dispatch(request, content) {
            Ok((payload, body)) => (RpcResponse::success(request_id, payload), body),
            Err(err) => (RpcResponse::error(request_id, err.to_payload()), None),
        }
    }

    fn check_failure(&self, op: &Operation) -> Option<FailureConfig> {
        self.failures.lock().unwrap().check(op).cloned()
    }

    fn dispatch(&self, request: &RpcRequest, content: Option<&[u8]>) -> Result<Reply, QueueError> {
        match request.op {
            Operation::Locate => reply(self.handle_locate(payload(request)?)?),
            Operation::BeginTransaction => reply(self.handle_begin()),
            Operation::Enqueue => reply(self.handle_enqueue(payload(request)?)?),
            Operation::Commit => reply(self.handle_commit(payload(request)?)?),
            Operation::Abort => reply(self.handle_abort(payload(request)?)),
            Operation::Spool => {
                let content = content.ok_or_else(|| {
                    QueueError::InvalidRequest("spool requires an archive payload".to_string())
                })?;
                reply(self.handle_spool(payload(request)?, content)?)
            }
            Operation::Query => reply(self.handle_query(payload(request)?)?),
            Operation::Retrieve => {
                let (metadata, archive) = self.handle_retrieve(payload(request)?)?;
                let (value, _) = reply(metadata)?;
                Ok((value, Some(archive)))
            }
            Operation::Edit => reply(self.handle_edit(payload(request)?)?),
            Operation::Act => reply(self.handle_act(payload(request)?)?),
            Operation::RequestToken => reply(self.handle_request_token(payload(request)?)),
            Operation::FetchToken => reply(self.handle_fetch_token(payload(request)?)?),
        }
    }

    // === Operation handlers ===

    fn handle_locate(&self, request: LocateRequest) -> Result<LocateResponse, QueueError> {
        let registry = self.registry.lock().unwrap();
        let found = match request.name.as_deref() {
            None => registry.first(),
            Some(name) => registry.iter().find(|e| e.name.eq_ignore_ascii_case(name)),
        };
        found.cloned().ok_or_else(|| QueueError::NotFound {
            what: "schedd",
            name: request.name.unwrap_or_else(|| "<default>".to_string()),
        })
    }

    fn handle_begin(&self) -> TransactionRef {
        let mut state = self.state.lock().unwrap();
        let transaction_id = state.next_id("txn");
        state
            .transactions
            .insert(transaction_id.clone(), StagedTransaction::default());
        TransactionRef { transaction_id }
    }

    fn handle_enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse, QueueError> {
        validate_item_data(request.count, &request.item_data)
            .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;

        let now = self.now();
        let progression = self.default_progression.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        if !state.transactions.contains_key(&request.transaction_id) {
            return Err(QueueError::NotFound {
                what: "transaction",
                name: request.transaction_id,
            });
        }

        let cluster_id = state.allocate_cluster();
        let ads = materialize(&request.description, request.count, &request.item_data, cluster_id);
        let num_procs = ads.len();
        let jobs = ads.iter().map(|ad| QueuedJob::new(ad, now, &progression));

        if let Some(transaction) = state.transactions.get_mut(&request.transaction_id) {
            transaction.jobs.extend(jobs);
        }
        debug!(cluster = %cluster_id, num_procs, "staged cluster");

        Ok(EnqueueResponse {
            cluster_id,
            num_procs,
        })
    }

    fn handle_commit(&self, request: TransactionRef) -> Result<serde_json::Value, QueueError> {
        let mut state = self.state.lock().unwrap();
        let transaction = state
            .transactions
            .remove(&request.transaction_id)
            .ok_or_else(|| QueueError::NotFound {
                what: "transaction",
                name: request.transaction_id.clone(),
            })?;
        for job in transaction.jobs {
            state.jobs.insert(job.id, job);
        }
        Ok(serde_json::json!({}))
    }

    /// Aborting an unknown transaction is a no-op
    fn handle_abort(&self, request: TransactionRef) -> serde_json::Value {
        self.state
            .lock()
            .unwrap()
            .transactions
            .remove(&request.transaction_id);
        serde_json::json!({})
    }

    fn handle_spool(&self, request: SpoolRequest, content: &[u8]) -> Result<SpoolResponse, QueueError> {
        let transfer = |msg: String| QueueError::TransferFailed(msg);

        if content.len() as u64 != request.content_length {
            return Err(transfer(format!(
                "expected {} bytes, received {}",
                request.content_length,
                content.len()
            )));
        }
        if sha256_hex(content) != request.content_sha256 {
            return Err(transfer("archive digest mismatch".to_string()));
        }
        let files = read_archive(content).map_err(|e| transfer(e.to_string()))?;
        let digest = manifest_for(&files)
            .digest()
            .map_err(|e| transfer(e.to_string()))?;
        if digest != request.manifest_digest {
            return Err(transfer("manifest digest mismatch".to_string()));
        }

        let now = self.now();
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&request.job_id)
            .ok_or_else(|| QueueError::NotFound {
                what: "job",
                name: request.job_id.to_string(),
            })?;

        let names: Vec<String> = files.keys().cloned().collect();
        job.inputs = files;
        if job.status() == JobStatus::Held {
            job.set("HoldReason", Value::Undefined);
            job.set("HoldReasonCode", Value::Undefined);
            job.set_status(JobStatus::Idle, now);
        }

        Ok(SpoolResponse {
            job_id: request.job_id,
            files: names,
        })
    }

    fn handle_query(&self, request: QueryRequest) -> Result<QueryResponse, QueueError> {
        let constraint = parse_constraint(&request.constraint)?;
        let now = self.now();
        let mut progressions = self.progressions.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        state.purge(now);

        let mut records = Vec::new();
        for id in state.matching(&constraint, now) {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            advance(job, progressions.get_mut(&id), now);
            records.push(job.project(&request.projection));
        }
        Ok(QueryResponse { records })
    }

    fn handle_retrieve(&self, request: RetrieveRequest) -> Result<(StreamMetadata, Vec<u8>), QueueError> {
        let now = self.now();
        let archive = {
            let mut state = self.state.lock().unwrap();
            state.purge(now);
            let job = state
                .jobs
                .get(&request.job_id)
                .ok_or_else(|| QueueError::NotFound {
                    what: "job",
                    name: request.job_id.to_string(),
                })?;
            if job.status() != JobStatus::Completed {
                return Err(QueueError::TransferFailed(format!(
                    "job {} is {}, output not available",
                    job.id,
                    job.status()
                )));
            }
            build_archive(&job.outputs).map_err(|e| QueueError::TransferFailed(e.to_string()))?
        };

        *self.fetches.lock().unwrap().entry(request.job_id).or_insert(0) += 1;

        let metadata = StreamMetadata {
            content_length: archive.len() as u64,
            content_sha256: sha256_hex(&archive),
            format: "tar".to_string(),
        };
        Ok((metadata, archive))
    }

    fn handle_edit(&self, request: EditRequest) -> Result<EditOutcome, QueueError> {
        if PROTECTED_ATTRIBUTES
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&request.attribute))
        {
            return Err(QueueError::InvalidRequest(format!(
                "attribute {} cannot be edited",
                request.attribute
            )));
        }
        let constraint = parse_constraint(&request.constraint)?;
        let guard = request.only_if.as_deref().map(parse_constraint).transpose()?;

        let now = self.now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);

        let mut outcome = EditOutcome {
            matched: 0,
            edited: 0,
        };
        for id in state.matching(&constraint, now) {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            outcome.matched += 1;
            if guard.as_ref().map(|g| job.matches(g, now)).unwrap_or(true) {
                job.set(&request.attribute, request.value.clone());
                outcome.edited += 1;
            }
        }
        Ok(outcome)
    }

    fn handle_act(&self, request: ActRequest) -> Result<ActResponse, QueueError> {
        let constraint = parse_constraint(&request.constraint)?;
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);

        let mut affected = 0;
        for id in state.matching(&constraint, now) {
            match request.action {
                // Removal through the action interface is explicit and final
                JobAction::Remove => {
                    state.jobs.remove(&id);
                    affected += 1;
                }
                JobAction::Hold => {
                    if let Some(job) = state.jobs.get_mut(&id) {
                        if matches!(job.status(), JobStatus::Idle | JobStatus::Running) {
                            job.set("HoldReason", Value::Str("held by user".to_string()));
                            job.set_status(JobStatus::Held, now);
                            affected += 1;
                        }
                    }
                }
                JobAction::Release => {
                    if let Some(job) = state.jobs.get_mut(&id) {
                        if job.status() == JobStatus::Held {
                            job.set("HoldReason", Value::Undefined);
                            job.set_status(JobStatus::Idle, now);
                            affected += 1;
                        }
                    }
                }
            }
        }
        Ok(ActResponse { affected })
    }

    fn handle_request_token(&self, request: TokenRequest) -> TokenRequestResponse {
        let scripted = self.scripted_token_ids.lock().unwrap().pop_front();
        let mut state = self.state.lock().unwrap();
        let request_id = scripted.unwrap_or_else(|| state.next_token_request_id());
        state.token_requests.insert(
            request_id.clone(),
            TokenRequestState {
                identity: request.identity,
                authorizations: request.authorizations,
                approved: false,
                fetches: 0,
            },
        );
        TokenRequestResponse { request_id }
    }

    fn handle_fetch_token(&self, request: FetchTokenRequest) -> Result<FetchTokenResponse, QueueError> {
        let auto_approve = *self.auto_approve_after.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let entry = state
            .token_requests
            .get_mut(&request.request_id)
            .ok_or_else(|| QueueError::NotFound {
                what: "token request",
                name: request.request_id.clone(),
            })?;

        entry.fetches += 1;
        let approved = entry.approved || auto_approve.map(|n| entry.fetches > n).unwrap_or(false);
        if !approved {
            return Err(QueueError::Pending(request.request_id));
        }

        let claims = format!(
            "{}|{}|{}",
            entry.identity,
            entry.authorizations.join(","),
            request.request_id
        );
        Ok(FetchTokenResponse {
            token: format!("mock.{}", sha256_hex(claims.as_bytes())),
        })
    }
}

/// Step a job one status forward. Held and finished jobs stay put.
fn advance(job: &mut QueuedJob, overrides: Option<&mut VecDeque<JobStatus>>, now: i64) {
    if matches!(
        job.status(),
        JobStatus::Held | JobStatus::Completed | JobStatus::Removed
    ) {
        return;
    }
    let next = match overrides {
        Some(queue) => queue.pop_front(),
        None => job.pending.pop_front(),
    };
    match next {
        Some(JobStatus::Completed) => job.complete(now),
        Some(status) => job.set_status(status, now),
        None => {}
    }
}

fn parse_constraint(text: &str) -> Result<Expr, QueueError> {
    parse(text).map_err(|e| QueueError::InvalidRequest(format!("bad constraint {:?}: {}", text, e)))
}

/// A missing payload reads as an empty object
fn payload<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, QueueError> {
    let value = match &request.payload {
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| QueueError::InvalidRequest(format!("{} payload: {}", request.op, e)))
}

fn reply<T: Serialize>(value: T) -> Result<Reply, QueueError> {
    serde_json::to_value(value)
        .map(|v| (v, None))
        .map_err(|e| QueueError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ClusterId, JobDescription};
    use crate::spool::bundle::manifest_for;
    use serde_json::json;

    fn request(op: Operation, payload: serde_json::Value) -> RpcRequest {
        RpcRequest::new(op, "test-001", payload)
    }

    fn ok_payload(response: RpcResponse) -> serde_json::Value {
        assert!(response.ok, "unexpected error: {:?}", response.error);
        response.payload.unwrap()
    }

    fn description() -> JobDescription {
        [("executable", "/bin/cat"), ("hold", "true")]
            .into_iter()
            .collect()
    }

    /// Enqueue and commit `count` held jobs, returning the cluster
    fn submit(schedd: &MockSchedd, count: usize) -> ClusterId {
        let begin = ok_payload(schedd.handle_request(&request(Operation::BeginTransaction, json!({}))));
        let txn = begin["transaction_id"].as_str().unwrap().to_string();
        let enqueue = ok_payload(schedd.handle_request(&request(
            Operation::Enqueue,
            json!({"transaction_id": txn, "description": description(), "count": count}),
        )));
        ok_payload(schedd.handle_request(&request(Operation::Commit, json!({"transaction_id": txn}))));
        ClusterId(enqueue["cluster_id"].as_i64().unwrap())
    }

    fn spool(schedd: &MockSchedd, job: JobId, files: &BTreeMap<String, Vec<u8>>) -> RpcResponse {
        let archive = build_archive(files).unwrap();
        let header = SpoolRequest {
            job_id: job,
            content_length: archive.len() as u64,
            content_sha256: sha256_hex(&archive),
            manifest_digest: manifest_for(files).digest().unwrap(),
        };
        schedd.handle_framed(
            &request(Operation::Spool, serde_json::to_value(header).unwrap()),
            &archive,
        )
    }

    #[test]
    fn test_locate_default_and_named() {
        let schedd = MockSchedd::new();
        schedd.register_schedd("submit-2", "<10.0.0.2:9618>");

        let default = ok_payload(schedd.handle_request(&request(Operation::Locate, json!({}))));
        assert_eq!(default["name"], DEFAULT_SCHEDD_NAME);

        let named = ok_payload(
            schedd.handle_request(&request(Operation::Locate, json!({"name": "submit-2"}))),
        );
        assert_eq!(named["address"], "<10.0.0.2:9618>");

        let missing = schedd.handle_request(&request(Operation::Locate, json!({"name": "nope"})));
        assert_eq!(missing.error.unwrap().code, "NOT_FOUND");
    }

    #[test]
    fn test_transaction_staged_until_commit() {
        let schedd = MockSchedd::new();
        let begin = ok_payload(schedd.handle_request(&request(Operation::BeginTransaction, json!({}))));
        let txn = begin["transaction_id"].as_str().unwrap();
        ok_payload(schedd.handle_request(&request(
            Operation::Enqueue,
            json!({"transaction_id": txn, "description": description(), "count": 3}),
        )));
        assert!(schedd.job_ids().is_empty());

        ok_payload(schedd.handle_request(&request(Operation::Abort, json!({"transaction_id": txn}))));
        assert!(schedd.job_ids().is_empty());
        assert_eq!(schedd.open_transactions(), 0);

        let cluster = submit(&schedd, 3);
        assert_eq!(schedd.job_ids().len(), 3);
        assert_eq!(
            schedd.job_status(JobId::new(cluster, 2)),
            Some(JobStatus::Held)
        );
    }

    #[test]
    fn test_enqueue_unknown_transaction() {
        let schedd = MockSchedd::new();
        let response = schedd.handle_request(&request(
            Operation::Enqueue,
            json!({"transaction_id": "txn-x", "description": description(), "count": 1}),
        ));
        assert_eq!(response.error.unwrap().code, "NOT_FOUND");
    }

    #[test]
    fn test_spool_releases_hold() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 1);
        let job = JobId::new(cluster, 0);
        let files = BTreeMap::from([("in.txt".to_string(), b"data".to_vec())]);

        let payload = ok_payload(spool(&schedd, job, &files));
        assert_eq!(payload["files"], json!(["in.txt"]));
        assert_eq!(schedd.job_status(job), Some(JobStatus::Idle));
        assert_eq!(schedd.job_inputs(job).unwrap(), files);
    }

    #[test]
    fn test_spool_digest_mismatch() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 1);
        let job = JobId::new(cluster, 0);
        let archive = build_archive(&BTreeMap::new()).unwrap();
        let header = json!({
            "job_id": job,
            "content_length": archive.len(),
            "content_sha256": "00",
            "manifest_digest": "00",
        });
        let response = schedd.handle_framed(&request(Operation::Spool, header), &archive);
        assert_eq!(response.error.unwrap().code, "TRANSFER_FAILED");
        assert_eq!(schedd.job_status(job), Some(JobStatus::Held));
    }

    #[test]
    fn test_query_advances_progression() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 1);
        let job = JobId::new(cluster, 0);
        spool(&schedd, job, &BTreeMap::from([("a".to_string(), b"x".to_vec())]));

        let query = request(
            Operation::Query,
            json!({"constraint": cluster.constraint().to_string(), "projection": ["JobStatus"]}),
        );
        let first = ok_payload(schedd.handle_request(&query));
        assert_eq!(first["records"][0]["JobStatus"], 2);
        let second = ok_payload(schedd.handle_request(&query));
        assert_eq!(second["records"][0]["JobStatus"], 4);
        assert_eq!(second["records"][0].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_held_jobs_do_not_advance() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 1);
        let query = request(
            Operation::Query,
            json!({"constraint": cluster.constraint().to_string()}),
        );
        for _ in 0..3 {
            ok_payload(schedd.handle_request(&query));
        }
        assert_eq!(schedd.job_status(JobId::new(cluster, 0)), Some(JobStatus::Held));
    }

    #[test]
    fn test_retrieve_requires_completion() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 1);
        let job = JobId::new(cluster, 0);
        let fetch = request(Operation::Retrieve, json!({"job_id": job}));

        let (response, body) = schedd.handle_fetch(&fetch);
        assert_eq!(response.error.unwrap().code, "TRANSFER_FAILED");
        assert!(body.is_none());

        spool(&schedd, job, &BTreeMap::from([("a".to_string(), b"abc".to_vec())]));
        schedd.complete_job(job);
        let (response, body) = schedd.handle_fetch(&fetch);
        // no retention policy installed, so the record is purged on completion
        assert_eq!(response.error.unwrap().code, "NOT_FOUND");
        assert!(body.is_none());
    }

    #[test]
    fn test_edit_with_guard() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 2);
        let edit = |only_if: Option<&str>| {
            let mut payload = json!({
                "constraint": cluster.constraint().to_string(),
                "attribute": "RetrievalClaim",
                "value": "claim-1",
            });
            if let Some(guard) = only_if {
                payload["only_if"] = json!(guard);
            }
            ok_payload(schedd.handle_request(&request(Operation::Edit, payload)))
        };

        let first = edit(Some("RetrievalClaim =?= UNDEFINED"));
        assert_eq!(first, json!({"matched": 2, "edited": 2}));
        let second = edit(Some("RetrievalClaim =?= UNDEFINED"));
        assert_eq!(second, json!({"matched": 2, "edited": 0}));
        assert_eq!(
            schedd.job_attribute(JobId::new(cluster, 1), "RetrievalClaim"),
            Some(Value::Str("claim-1".to_string()))
        );
    }

    #[test]
    fn test_edit_rejects_protected_and_bad_constraint() {
        let schedd = MockSchedd::new();
        let protected = schedd.handle_request(&request(
            Operation::Edit,
            json!({"constraint": "true", "attribute": "JobStatus", "value": 4}),
        ));
        assert_eq!(protected.error.unwrap().code, "INVALID_REQUEST");

        let bad = schedd.handle_request(&request(
            Operation::Query,
            json!({"constraint": "ClusterId == ", "projection": []}),
        ));
        assert_eq!(bad.error.unwrap().code, "INVALID_REQUEST");
    }

    #[test]
    fn test_act_remove_and_hold() {
        let schedd = MockSchedd::new();
        let cluster = submit(&schedd, 2);
        let job = JobId::new(cluster, 0);
        spool(&schedd, job, &BTreeMap::new());

        let hold = ok_payload(schedd.handle_request(&request(
            Operation::Act,
            json!({"constraint": cluster.constraint().to_string(), "action": "hold"}),
        )));
        // the second job is still held for spooling
        assert_eq!(hold["affected"], 1);

        let removed = ok_payload(schedd.handle_request(&request(
            Operation::Act,
            json!({"constraint": cluster.constraint().to_string(), "action": "remove"}),
        )));
        assert_eq!(removed["affected"], 2);
        assert!(schedd.job_ids().is_empty());
    }

    #[test]
    fn test_token_flow() {
        let schedd = MockSchedd::new();
        schedd.script_token_ids(vec!["0123".to_string()]);

        let first = ok_payload(schedd.handle_request(&request(
            Operation::RequestToken,
            json!({"identity": "alice@example.org", "authorizations": ["WRITE"]}),
        )));
        assert_eq!(first["request_id"], "0123");

        let second = ok_payload(schedd.handle_request(&request(
            Operation::RequestToken,
            json!({"identity": "alice@example.org"}),
        )));
        let id = second["request_id"].as_str().unwrap().to_string();
        assert!(!id.starts_with('0'));

        let fetch = request(Operation::FetchToken, json!({"request_id": id}));
        assert_eq!(schedd.handle_request(&fetch).error.unwrap().code, "PENDING");
        assert!(schedd.approve_token(&id));
        let token = ok_payload(schedd.handle_request(&fetch));
        assert!(token["token"].as_str().unwrap().starts_with("mock."));
    }

    #[test]
    fn test_injected_failure_and_call_counts() {
        let schedd = MockSchedd::new();
        schedd.inject_failure(Operation::Query, FailureConfig::busy(2).with_fail_count(1));
        let query = request(Operation::Query, json!({"constraint": "true"}));

        let busy = schedd.handle_request(&query);
        assert_eq!(busy.error.unwrap().data_u64("retry_after_seconds"), Some(2));
        assert!(schedd.handle_request(&query).ok);
        assert_eq!(schedd.calls(Operation::Query), 2);
    }

    #[test]
    fn test_protocol_version_checked() {
        let schedd = MockSchedd::new();
        let mut req = request(Operation::BeginTransaction, json!({}));
        req.protocol_version = 99;
        let response = schedd.handle_request(&req);
        assert_eq!(response.error.unwrap().code, "INVALID_REQUEST");
    }

    #[test]
    fn test_handle_json() {
        let schedd = MockSchedd::new();
        let out = schedd
            .handle_json(r#"{"protocol_version":1,"op":"locate","request_id":"r1"}"#)
            .unwrap();
        let response: RpcResponse = serde_json::from_str(&out).unwrap();
        assert!(response.ok);
        assert_eq!(response.request_id, "r1");
    }
}
