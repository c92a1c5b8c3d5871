//! Job model
//!
//! Submit descriptions, per-instance item data, identifiers handed back by
//! the queue, and the projection of a queue record the client reads back.

mod ad;
mod load;

pub use ad::{materialize, JobAd};
pub use load::{load_description, load_item_data};

use std::collections::BTreeMap;
use std::fmt;

use classad_lite::{Expr, Value};
use serde::{Deserialize, Serialize};

/// Submit description: keyword to value, where values may be literals or
/// fragments of the queue's expression language.
///
/// Keywords are case-insensitive; the spelling used first is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDescription(BTreeMap<String, String>);

impl JobDescription {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_key(&self, key: &str) -> Option<&String> {
        self.0.keys().find(|k| k.eq_ignore_ascii_case(key))
    }

    /// Look up a keyword, ignoring case
    pub fn get(&self, key: &str) -> Option<&str> {
        self.find_key(key)
            .and_then(|k| self.0.get(k))
            .map(String::as_str)
    }

    /// Set a keyword, replacing any existing spelling of it
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let existing = self.find_key(key).cloned();
        let key = existing.unwrap_or_else(|| key.to_string());
        self.0.insert(key, value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let existing = self.find_key(key).cloned()?;
        self.0.remove(&existing)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_key(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobDescription {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut description = JobDescription::new();
        for (k, v) in iter {
            description.set(&k.into(), v);
        }
        description
    }
}

/// One substitution map per job instance
pub type ItemData = Vec<BTreeMap<String, String>>;

/// Queue status of a job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum JobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    /// Any code outside the known range
    SubmissionErr,
}

impl JobStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => JobStatus::Idle,
            2 => JobStatus::Running,
            3 => JobStatus::Removed,
            4 => JobStatus::Completed,
            5 => JobStatus::Held,
            6 => JobStatus::TransferringOutput,
            7 => JobStatus::Suspended,
            _ => JobStatus::SubmissionErr,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            JobStatus::Idle => 1,
            JobStatus::Running => 2,
            JobStatus::Removed => 3,
            JobStatus::Completed => 4,
            JobStatus::Held => 5,
            JobStatus::TransferringOutput => 6,
            JobStatus::Suspended => 7,
            JobStatus::SubmissionErr => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "Idle",
            JobStatus::Running => "Running",
            JobStatus::Removed => "Removed",
            JobStatus::Completed => "Completed",
            JobStatus::Held => "Held",
            JobStatus::TransferringOutput => "TransferringOutput",
            JobStatus::Suspended => "Suspended",
            JobStatus::SubmissionErr => "SubmissionErr",
        }
    }
}

impl From<i64> for JobStatus {
    fn from(code: i64) -> Self {
        JobStatus::from_code(code)
    }
}

impl From<JobStatus> for i64 {
    fn from(status: JobStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the job array created by one enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub i64);

impl ClusterId {
    /// `ClusterId == <id>`
    pub fn constraint(&self) -> Expr {
        Expr::attr("ClusterId").equals(Expr::int(self.0))
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instance within a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: ClusterId,
    pub proc: i64,
}

impl JobId {
    pub fn new(cluster: ClusterId, proc: i64) -> Self {
        Self { cluster, proc }
    }

    /// `ClusterId == <cluster> && ProcId == <proc>`
    pub fn constraint(&self) -> Expr {
        self.cluster
            .constraint()
            .and(Expr::attr("ProcId").equals(Expr::int(self.proc)))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

/// Handle returned by a committed enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub cluster_id: ClusterId,
    pub num_procs: usize,
}

/// Projection of a queue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub attributes: BTreeMap<String, Value>,
}

impl JobRecord {
    /// Build a record from a projected attribute map.
    ///
    /// `ClusterId`, `ProcId` and `JobStatus` must be present.
    pub fn from_attributes(attributes: BTreeMap<String, Value>) -> Result<Self, JobError> {
        let int = |name: &'static str| {
            lookup(&attributes, name)
                .and_then(Value::as_i64)
                .ok_or(JobError::MissingAttribute(name))
        };
        let cluster = int("ClusterId")?;
        let proc = int("ProcId")?;
        let status = JobStatus::from_code(int("JobStatus")?);

        Ok(Self {
            id: JobId::new(ClusterId(cluster), proc),
            status,
            attributes,
        })
    }

    /// Look up an attribute, ignoring case
    pub fn get(&self, name: &str) -> Option<&Value> {
        lookup(&self.attributes, name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

fn lookup<'a>(attributes: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Value> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Job model errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("count is {count} but item data has {items} entries")]
    ItemCountMismatch { count: usize, items: usize },

    #[error("count must be at least 1")]
    EmptySubmission,

    #[error("record is missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("failed to load {path}: {message}")]
    Load { path: String, message: String },
}

/// Check item data against the requested count.
///
/// Returns the number of instances the submission will produce. With no item
/// data, `count` plain instances are produced; otherwise `count` must match
/// the number of item rows.
pub fn validate_item_data(count: usize, item_data: &ItemData) -> Result<usize, JobError> {
    if count == 0 {
        return Err(JobError::EmptySubmission);
    }
    if item_data.is_empty() {
        return Ok(count);
    }
    if item_data.len() != count {
        return Err(JobError::ItemCountMismatch {
            count,
            items: item_data.len(),
        });
    }
    Ok(count)
}
