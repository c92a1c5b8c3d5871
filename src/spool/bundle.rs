//! Input bundling and archive handling
//!
//! Each job instance's declared inputs are packed into a canonical tar
//! archive: sorted entries, epoch mtimes, zero uid/gid, normalized modes.
//! The same bytes always hash the same, so the queue can verify what it
//! received against the digests sent alongside.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use crate::job::{JobAd, JobId};

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("input file not found: {path}")]
    MissingInput { path: PathBuf },

    #[error("two inputs map to the same sandbox name: {name}")]
    DuplicateEntry { name: String },

    #[error("unsafe archive path: {path}")]
    UnsafePath { path: String },

    #[error("JCS canonicalization error: {0}")]
    Jcs(String),
}

/// One file in an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path within the sandbox
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// File list of an input archive, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputManifest {
    pub entries: Vec<ManifestEntry>,
}

impl InputManifest {
    /// SHA-256 of the JCS form of the entry list
    pub fn digest(&self) -> Result<String, BundleError> {
        let jcs_bytes = serde_json_canonicalizer::to_vec(&self.entries)
            .map_err(|e| BundleError::Jcs(e.to_string()))?;
        Ok(sha256_hex(&jcs_bytes))
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }
}

/// Archive ready to spool for one instance
#[derive(Debug, Clone)]
pub struct InputBundle {
    pub job_id: JobId,
    pub archive: Vec<u8>,
    pub manifest: InputManifest,
    /// SHA-256 of the archive bytes
    pub content_sha256: String,
    pub manifest_digest: String,
    /// URL inputs left for the remote side to fetch
    pub skipped_urls: Vec<String>,
}

/// Packs declared inputs relative to a base directory
#[derive(Debug, Clone)]
pub struct InputBundler {
    root: PathBuf,
}

impl InputBundler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bundle the inputs declared by a job ad
    pub fn bundle(&self, ad: &JobAd) -> Result<InputBundle, BundleError> {
        self.bundle_files(ad.id, &ad.input_files())
    }

    /// Bundle a list of declared inputs.
    ///
    /// A file lands in the sandbox under its base name; a directory is added
    /// recursively under its own name.
    pub fn bundle_files(&self, job_id: JobId, inputs: &[String]) -> Result<InputBundle, BundleError> {
        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut skipped_urls = Vec::new();

        for input in inputs {
            if is_url(input) {
                skipped_urls.push(input.clone());
                continue;
            }

            let path = self.root.join(input);
            let metadata = fs::symlink_metadata(&path)
                .map_err(|_| BundleError::MissingInput { path: path.clone() })?;
            let base = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| BundleError::UnsafePath { path: input.clone() })?;

            if metadata.is_dir() {
                for entry in WalkDir::new(&path)
                    .follow_links(true)
                    .sort_by(|a, b| a.file_name().cmp(b.file_name()))
                {
                    let entry = entry?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(&path)
                        .map_err(|_| BundleError::UnsafePath {
                            path: entry.path().display().to_string(),
                        })?;
                    let name = format!("{}/{}", base, rel.to_string_lossy().replace('\\', "/"));
                    insert_unique(&mut files, name, fs::read(entry.path())?)?;
                }
            } else {
                insert_unique(&mut files, base, fs::read(&path)?)?;
            }
        }

        let archive = build_archive(&files)?;
        let manifest = manifest_for(&files);

        Ok(InputBundle {
            job_id,
            content_sha256: sha256_hex(&archive),
            manifest_digest: manifest.digest()?,
            archive,
            manifest,
            skipped_urls,
        })
    }
}

fn insert_unique(
    files: &mut BTreeMap<String, Vec<u8>>,
    name: String,
    contents: Vec<u8>,
) -> Result<(), BundleError> {
    if files.contains_key(&name) {
        return Err(BundleError::DuplicateEntry { name });
    }
    files.insert(name, contents);
    Ok(())
}

/// `scheme://...` inputs are fetched by the execute side
pub fn is_url(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Build a canonical archive from name -> contents
pub fn build_archive(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, BundleError> {
    let mut buffer = Vec::new();
    {
        let mut builder = Builder::new(&mut buffer);
        for (name, contents) in files {
            let mut header = Header::new_gnu();
            header.set_path(name)?;
            header.set_size(contents.len() as u64);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, contents.as_slice())?;
        }
        builder.finish()?;
    }
    Ok(buffer)
}

/// Manifest of a name -> contents map
pub fn manifest_for(files: &BTreeMap<String, Vec<u8>>) -> InputManifest {
    InputManifest {
        entries: files
            .iter()
            .map(|(path, contents)| ManifestEntry {
                path: path.clone(),
                size: contents.len() as u64,
                sha256: sha256_hex(contents),
            })
            .collect(),
    }
}

/// Read every regular file out of an archive, rejecting unsafe paths
pub fn read_archive(archive: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, BundleError> {
    let mut files = BTreeMap::new();
    let mut reader = Archive::new(archive);
    for entry in reader.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().to_string();
        let safe = safe_relative_path(&path)?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        files.insert(safe.to_string_lossy().replace('\\', "/"), contents);
    }
    Ok(files)
}

/// Validate that an archive member stays inside its destination
pub fn safe_relative_path(name: &str) -> Result<PathBuf, BundleError> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::UnsafePath {
                    path: name.to_string(),
                })
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(BundleError::UnsafePath {
            path: name.to_string(),
        });
    }
    Ok(out)
}
