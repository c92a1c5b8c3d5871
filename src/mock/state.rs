//! Mock queue state
//!
//! Queued job records, transactions staged until commit, and token requests.

use std::collections::{BTreeMap, HashMap, VecDeque};

use classad_lite::{parse, Env, Expr, Value};

use crate::job::{ClusterId, JobAd, JobId, JobStatus};
use crate::remap::{STDERR_NAME, STDOUT_NAME};

/// A job record held by the mock queue
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    attributes: BTreeMap<String, Value>,
    /// Spooled input sandbox
    pub inputs: BTreeMap<String, Vec<u8>>,
    /// Output sandbox, filled on completion
    pub outputs: BTreeMap<String, Vec<u8>>,
    /// Statuses still to step through, one per matching query
    pub pending: VecDeque<JobStatus>,
}

impl QueuedJob {
    pub fn new(ad: &JobAd, now: i64, progression: &[JobStatus]) -> Self {
        let mut job = Self {
            id: ad.id,
            attributes: ad.to_attributes(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            pending: progression.iter().copied().collect(),
        };
        job.set("QDate", Value::Int(now));
        let status = if ad.is_held() {
            JobStatus::Held
        } else {
            JobStatus::Idle
        };
        job.set_status(status, now);
        job
    }

    pub fn status(&self) -> JobStatus {
        self.get("JobStatus")
            .and_then(Value::as_i64)
            .map(JobStatus::from_code)
            .unwrap_or(JobStatus::SubmissionErr)
    }

    pub fn set_status(&mut self, status: JobStatus, now: i64) {
        self.set("JobStatus", Value::Int(status.code()));
        self.set("EnteredCurrentStatus", Value::Int(now));
    }

    /// Mark completed and produce the output sandbox: stdout is the
    /// concatenation of the inputs in name order, stderr is empty.
    pub fn complete(&mut self, now: i64) {
        self.set_status(JobStatus::Completed, now);
        self.set("CompletionDate", Value::Int(now));
        self.set("ExitCode", Value::Int(0));

        let stdout: Vec<u8> = self.inputs.values().flatten().copied().collect();
        self.outputs.insert(STDOUT_NAME.to_string(), stdout);
        self.outputs.insert(STDERR_NAME.to_string(), Vec::new());
    }

    fn key(&self, name: &str) -> Option<&String> {
        self.attributes.keys().find(|k| k.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.key(name).and_then(|k| self.attributes.get(k))
    }

    /// Set an attribute, keeping the existing spelling. `UNDEFINED` deletes it.
    pub fn set(&mut self, name: &str, value: Value) {
        let key = self.key(name).cloned().unwrap_or_else(|| name.to_string());
        if value.is_undefined() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, value);
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Projected copy of the record; an empty projection keeps everything
    pub fn project(&self, projection: &[String]) -> BTreeMap<String, Value> {
        if projection.is_empty() {
            return self.attributes.clone();
        }
        projection
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn matches(&self, expr: &Expr, now: i64) -> bool {
        expr.matches(&JobEnv { job: self, now })
    }

    /// Evaluate `LeaveJobInQueue`; a missing or unparsable policy does not retain
    pub fn retained(&self, now: i64) -> bool {
        match self.get("LeaveJobInQueue") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Str(text)) => parse(text)
                .map(|policy| self.matches(&policy, now))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Evaluation environment over one job record
pub struct JobEnv<'a> {
    job: &'a QueuedJob,
    now: i64,
}

impl Env for JobEnv<'_> {
    fn lookup(&self, name: &str) -> Value {
        self.job.get(name).cloned().unwrap_or(Value::Undefined)
    }

    fn now(&self) -> i64 {
        self.now
    }
}

/// Jobs enqueued inside an open transaction
#[derive(Debug, Default)]
pub struct StagedTransaction {
    pub jobs: Vec<QueuedJob>,
}

#[derive(Debug, Clone)]
pub struct TokenRequestState {
    pub identity: String,
    pub authorizations: Vec<String>,
    pub approved: bool,
    pub fetches: u32,
}

/// Everything the mock queue stores
#[derive(Debug)]
pub struct QueueState {
    pub jobs: BTreeMap<JobId, QueuedJob>,
    pub transactions: HashMap<String, StagedTransaction>,
    pub token_requests: BTreeMap<String, TokenRequestState>,
    next_cluster: i64,
    id_counter: u64,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            transactions: HashMap::new(),
            token_requests: BTreeMap::new(),
            next_cluster: 1,
            id_counter: 0,
        }
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{}-{:06}", prefix, self.id_counter)
    }

    /// Numeric id for a token request; never starts with `0`
    pub fn next_token_request_id(&mut self) -> String {
        self.id_counter += 1;
        format!("{}", 100_000 + self.id_counter)
    }

    pub fn allocate_cluster(&mut self) -> ClusterId {
        let id = ClusterId(self.next_cluster);
        self.next_cluster += 1;
        id
    }

    pub fn matching(&self, constraint: &Expr, now: i64) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|job| job.matches(constraint, now))
            .map(|job| job.id)
            .collect()
    }

    /// Drop finished records whose retention policy no longer holds them
    pub fn purge(&mut self, now: i64) -> Vec<JobId> {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| {
                matches!(job.status(), JobStatus::Completed | JobStatus::Removed)
                    && !job.retained(now)
            })
            .map(|job| job.id)
            .collect();
        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }
}
