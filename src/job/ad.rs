//! Per-instance job ads reconstructed on the client side.
//!
//! The queue's enqueue call only hands back a cluster id, so the client
//! expands the submit description itself to learn each instance's inputs,
//! outputs and remaps.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use classad_lite::Value;
use regex_lite::{Captures, Regex};

use super::{ClusterId, ItemData, JobDescription, JobId};
use crate::remap::{RemapError, RemapList};

/// Submit keywords whose queue attribute name differs from the keyword
const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("executable", "Cmd"),
    ("arguments", "Args"),
    ("output", "Out"),
    ("error", "Err"),
    ("transfer_input_files", "TransferInput"),
    ("transfer_output_remaps", "TransferOutputRemaps"),
    ("leave_in_queue", "LeaveJobInQueue"),
    ("request_cpus", "RequestCpus"),
    ("request_memory", "RequestMemory"),
    ("request_disk", "RequestDisk"),
];

/// A fully expanded job instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAd {
    pub id: JobId,
    keywords: BTreeMap<String, String>,
}

impl JobAd {
    /// Look up an expanded keyword, ignoring case
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Declared input files, in submit order
    pub fn input_files(&self) -> Vec<String> {
        self.get("transfer_input_files")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn output(&self) -> Option<&str> {
        self.non_empty("output")
    }

    pub fn error(&self) -> Option<&str> {
        self.non_empty("error")
    }

    pub fn remaps(&self) -> Result<RemapList, RemapError> {
        RemapList::parse(self.get("transfer_output_remaps").unwrap_or(""))
    }

    pub fn is_held(&self) -> bool {
        self.get("hold")
            .map(|v| Value::from_submit_text(v).is_true())
            .unwrap_or(false)
    }

    pub fn leave_in_queue(&self) -> Option<&str> {
        self.non_empty("leave_in_queue")
    }

    /// Attribute map the queue stores for this instance
    pub fn to_attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        for (key, value) in &self.keywords {
            if key.eq_ignore_ascii_case("hold") {
                continue;
            }
            let name = ATTRIBUTE_NAMES
                .iter()
                .find(|(keyword, _)| keyword.eq_ignore_ascii_case(key))
                .map(|(_, attribute)| attribute.to_string())
                .unwrap_or_else(|| key.clone());
            attributes.insert(name, Value::from_submit_text(value));
        }
        attributes.insert("ClusterId".to_string(), Value::Int(self.id.cluster.0));
        attributes.insert("ProcId".to_string(), Value::Int(self.id.proc));
        attributes
    }
}

fn macro_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(\$)?\(([A-Za-z_][A-Za-z0-9_.]*)\)").expect("macro pattern is valid")
    })
}

fn builtin_macro(name: &str, id: JobId) -> Option<String> {
    match name.to_ascii_lowercase().as_str() {
        "clusterid" | "cluster" => Some(id.cluster.0.to_string()),
        "procid" | "process" => Some(id.proc.to_string()),
        _ => None,
    }
}

fn expand(
    text: &str,
    id: JobId,
    row: Option<&BTreeMap<String, String>>,
    description: &JobDescription,
) -> String {
    macro_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            // `$$(...)` is expanded at match time by the queue, not here
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let name = &caps[2];
            if let Some(value) = row.and_then(|r| {
                r.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
            }) {
                return value;
            }
            if let Some(value) = builtin_macro(name, id) {
                return value;
            }
            description.get(name).map(String::from).unwrap_or_default()
        })
        .into_owned()
}

fn strip_my(key: &str) -> &str {
    match key.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("my.") => &key[3..],
        _ => key,
    }
}

/// Expand a description into per-instance ads.
///
/// With empty item data, `count` instances are produced; otherwise one per
/// item row. Callers validate the pair first with
/// [`validate_item_data`](super::validate_item_data).
pub fn materialize(
    description: &JobDescription,
    count: usize,
    item_data: &ItemData,
    cluster_id: ClusterId,
) -> Vec<JobAd> {
    let instances = if item_data.is_empty() {
        count
    } else {
        item_data.len()
    };

    (0..instances)
        .map(|proc| {
            let id = JobId::new(cluster_id, proc as i64);
            let row = item_data.get(proc);
            let keywords = description
                .iter()
                .map(|(key, value)| {
                    (
                        strip_my(key).to_string(),
                        expand(value, id, row, description),
                    )
                })
                .collect();
            JobAd { id, keywords }
        })
        .collect()
}
