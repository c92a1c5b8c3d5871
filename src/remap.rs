//! Output remap rewriting.
//!
//! The queue captures standard output and standard error on a channel of
//! their own, under the sandbox names `_condor_stdout` and `_condor_stderr`.
//! Adding both to `transfer_output_remaps` lets them come back through the
//! same transfer as every other output file, under the names the user
//! declared.

use std::fmt;

use classad_lite::quote;

/// Sandbox name of the captured standard output
pub const STDOUT_NAME: &str = "_condor_stdout";

/// Sandbox name of the captured standard error
pub const STDERR_NAME: &str = "_condor_stderr";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemapError {
    #[error("malformed remap entry {0:?}: expected <remote>=<local>")]
    Malformed(String),
}

/// `remote=local` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapEntry {
    pub source: String,
    pub destination: String,
}

impl RemapEntry {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Result<Self, RemapError> {
        let source = source.into().trim().to_string();
        let destination = destination.into().trim().to_string();
        let invalid = |s: &str| s.is_empty() || s.contains(['=', ';', '"']);
        if invalid(&source) || invalid(&destination) {
            return Err(RemapError::Malformed(format!("{}={}", source, destination)));
        }
        Ok(Self { source, destination })
    }
}

impl fmt::Display for RemapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.source, self.destination)
    }
}

/// Ordered remap list, at most one entry per source name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapList {
    entries: Vec<RemapEntry>,
}

impl RemapList {
    /// Parse a `;`-separated list, quoted or not.
    ///
    /// Blank entries are dropped; an entry without `=` or with an empty side
    /// is an error.
    pub fn parse(text: &str) -> Result<Self, RemapError> {
        let mut list = RemapList::default();
        let unquoted = text.replace('"', "");
        for raw in unquoted.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (source, destination) = raw
                .split_once('=')
                .ok_or_else(|| RemapError::Malformed(raw.to_string()))?;
            let entry = RemapEntry::new(source, destination)
                .map_err(|_| RemapError::Malformed(raw.to_string()))?;
            list.push(entry);
        }
        Ok(list)
    }

    /// Add an entry. An entry for an existing source replaces it in place.
    pub fn push(&mut self, entry: RemapEntry) {
        match self.entries.iter_mut().find(|e| e.source == entry.source) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[RemapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local name for a file found in the remote sandbox
    pub fn resolve<'a>(&'a self, remote_name: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|e| e.source == remote_name)
            .map(|e| e.destination.as_str())
            .unwrap_or(remote_name)
    }

    /// Serialized form stored in the submit description
    pub fn to_quoted(&self) -> String {
        quote(&self.to_string())
    }
}

impl fmt::Display for RemapList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        f.write_str(&joined.join(" ; "))
    }
}

/// Merge the standard streams into an existing remap string.
///
/// Output and error entries are added only when declared and non-empty.
pub fn rewrite_remaps(
    existing: Option<&str>,
    output: Option<&str>,
    error: Option<&str>,
) -> Result<String, RemapError> {
    let mut list = RemapList::parse(existing.unwrap_or(""))?;
    for (source, declared) in [(STDOUT_NAME, output), (STDERR_NAME, error)] {
        if let Some(path) = declared.map(str::trim).filter(|p| !p.is_empty()) {
            list.push(RemapEntry::new(source, path)?);
        }
    }
    Ok(list.to_quoted())
}
