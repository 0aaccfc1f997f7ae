//! # Export Archive
//!
//! Persists finalized transcripts as monotonically versioned artifacts with
//! embedded provenance. Every export for a job appends one version; history
//! is never rewritten or deleted.
//!
//! ## Filesystem layout (per job):
//! ```text
//! exports/{job}/
//!   {base}_v1.txt      versioned artifact (provenance header + text)
//!   {base}_v1.json     companion manifest (provenance + full history)
//!   {base}.txt         convenience copy mirroring the highest version
//!   index.json         append-only history of all versions
//!   provenance.json    latest provenance record
//! ```
//!
//! ## Consistency:
//! The next version number is `max(existing artifacts) + 1`, scanned from
//! disk. Every file is published by writing a temporary sibling and renaming
//! it into place, so readers never observe a half-written artifact and a
//! failed write consumes no version number. Exports for the same job are
//! serialized by a per-job lock; different jobs are independent.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Extension used for transcript artifacts.
const ARTIFACT_EXT: &str = "txt";

/// One entry in a job's export history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u32,
    pub actor: String,
    pub note: String,
    pub timestamp: String,
    pub artifact: String,
}

/// Provenance metadata embedded in each artifact and manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub original_filename: String,
    pub stored_filename: String,
    pub source_path: String,
    pub model: String,
    pub version: u32,
    pub last_editor: String,
    pub last_edited_at: String,
    pub history: Vec<HistoryEntry>,
}

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportVersion {
    pub version: u32,
    pub artifact_path: PathBuf,
    pub manifest_path: PathBuf,
    pub actor: String,
    pub note: String,
    pub timestamp: String,
}

/// Input for one export operation.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub job_id: String,
    /// Base name for artifact files, already sanitized.
    pub base: String,
    /// Finalized transcript text (post-correction, paragraphed).
    pub content: String,
    pub actor: String,
    pub note: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub source_path: String,
    pub model: String,
}

/// Per-job index file content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExportIndex {
    job_id: String,
    base: String,
    history: Vec<HistoryEntry>,
}

/// Versioned transcript archive rooted at one directory.
pub struct ExportArchive {
    root: PathBuf,
    /// Per-job export locks; the outer mutex only guards map access.
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExportArchive {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Archive a new version of a job's transcript.
    ///
    /// Determines the next version from the artifacts already on disk,
    /// writes the artifact, companion manifest, latest copy, index and
    /// provenance record, and returns the published version.
    pub async fn export(&self, request: ExportRequest) -> AppResult<ExportVersion> {
        let lock = self.lock_for(&request.job_id);
        let _guard = lock.lock().await;

        let dir = self.job_dir(&request.job_id);
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Internal(format!(
                "could not create export directory {}: {}",
                dir.display(),
                err
            ))
        })?;

        let version = next_version(&dir, &request.base)?;
        let timestamp = chrono::Utc::now().to_rfc3339();

        let artifact_name = format!("{}_v{}.{}", request.base, version, ARTIFACT_EXT);
        let manifest_name = format!("{}_v{}.json", request.base, version);
        let latest_name = format!("{}.{}", request.base, ARTIFACT_EXT);

        let artifact_path = dir.join(&artifact_name);
        let manifest_path = dir.join(&manifest_name);

        let mut index = read_index(&dir).unwrap_or_else(|| ExportIndex {
            job_id: request.job_id.clone(),
            base: request.base.clone(),
            history: Vec::new(),
        });
        index.history.push(HistoryEntry {
            version,
            actor: request.actor.clone(),
            note: request.note.clone(),
            timestamp: timestamp.clone(),
            artifact: artifact_name.clone(),
        });

        let provenance = ProvenanceRecord {
            original_filename: request.original_filename.clone(),
            stored_filename: request.stored_filename.clone(),
            source_path: request.source_path.clone(),
            model: request.model.clone(),
            version,
            last_editor: request.actor.clone(),
            last_edited_at: timestamp.clone(),
            history: index.history.clone(),
        };

        let artifact_body = format!("{}\n{}", provenance_header(&provenance), request.content);
        let manifest_body = serde_json::to_vec_pretty(&provenance)
            .map_err(|err| AppError::Internal(format!("manifest serialization: {}", err)))?;
        let index_body = serde_json::to_vec_pretty(&index)
            .map_err(|err| AppError::Internal(format!("index serialization: {}", err)))?;

        // Publish the artifact first: it alone decides whether the version
        // number is consumed. Each write goes through a temp-then-rename so
        // readers never see partial files.
        write_atomic(&artifact_path, artifact_body.as_bytes())?;
        write_atomic(&manifest_path, &manifest_body)?;
        write_atomic(&dir.join(&latest_name), artifact_body.as_bytes())?;
        write_atomic(&dir.join("index.json"), &index_body)?;
        write_atomic(&dir.join("provenance.json"), &manifest_body)?;

        info!(
            job_id = %request.job_id,
            version,
            artifact = %artifact_path.display(),
            actor = %request.actor,
            "transcript exported"
        );

        Ok(ExportVersion {
            version,
            artifact_path,
            manifest_path,
            actor: request.actor,
            note: request.note,
            timestamp,
        })
    }

    /// Export history for a job, oldest first. Empty when nothing was
    /// exported yet.
    pub fn history(&self, job_id: &str) -> Vec<HistoryEntry> {
        read_index(&self.job_dir(job_id))
            .map(|index| index.history)
            .unwrap_or_default()
    }

    /// Best-effort provenance for a job's latest version.
    ///
    /// Prefers the explicitly stored record, falls back to the latest
    /// version's companion manifest, and finally reconstructs a minimal
    /// record from the index history plus the caller-supplied audio
    /// metadata (original name, source path).
    pub fn latest_provenance(
        &self,
        job_id: &str,
        base: &str,
        audio: Option<(&str, &str)>,
    ) -> Option<ProvenanceRecord> {
        let dir = self.job_dir(job_id);

        if let Some(record) = read_json::<ProvenanceRecord>(&dir.join("provenance.json")) {
            return Some(record);
        }

        if let Ok(Some(version)) = highest_version(&dir, base) {
            let manifest = dir.join(format!("{}_v{}.json", base, version));
            if let Some(record) = read_json::<ProvenanceRecord>(&manifest) {
                return Some(record);
            }
        }

        let index = read_index(&dir)?;
        let last = index.history.last()?;
        let (original_filename, source_path) = audio.unwrap_or(("", ""));
        Some(ProvenanceRecord {
            original_filename: original_filename.to_string(),
            stored_filename: String::new(),
            source_path: source_path.to_string(),
            model: String::new(),
            version: last.version,
            last_editor: last.actor.clone(),
            last_edited_at: last.timestamp.clone(),
            history: index.history,
        })
    }

    /// Path of the latest convenience copy for a job, if one exists.
    pub fn latest_artifact(&self, job_id: &str, base: &str) -> Option<PathBuf> {
        let path = self.job_dir(job_id).join(format!("{}.{}", base, ARTIFACT_EXT));
        path.exists().then_some(path)
    }
}

/// Render the delimited provenance header embedded in each artifact.
fn provenance_header(record: &ProvenanceRecord) -> String {
    format!(
        "===== TRANSCRIPT PROVENANCE =====\n\
         Original file:  {}\n\
         Stored file:    {}\n\
         Source path:    {}\n\
         Engine model:   {}\n\
         Version:        {}\n\
         Last edited by: {}\n\
         Last edited at: {}\n\
         =================================\n",
        record.original_filename,
        record.stored_filename,
        record.source_path,
        record.model,
        record.version,
        record.last_editor,
        record.last_edited_at,
    )
}

/// Next version for a job: one past the highest artifact on disk, or 1.
fn next_version(dir: &Path, base: &str) -> AppResult<u32> {
    Ok(highest_version(dir, base)?.map_or(1, |v| v + 1))
}

/// Highest `{base}_v{N}.txt` version present in `dir`.
fn highest_version(dir: &Path, base: &str) -> AppResult<Option<u32>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::Internal(format!(
                "could not scan export directory {}: {}",
                dir.display(),
                err
            )))
        }
    };

    let prefix = format!("{}_v", base);
    let suffix = format!(".{}", ARTIFACT_EXT);
    let mut highest = None;

    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(name) => name,
            None => continue,
        };
        let version = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
            .and_then(|digits| digits.parse::<u32>().ok());
        if let Some(version) = version {
            highest = Some(highest.map_or(version, |h: u32| h.max(version)));
        }
    }

    Ok(highest)
}

/// Write a file by publishing a fully written temporary sibling.
fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Internal(format!("bad export path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let write_result = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp);
        warn!(path = %path.display(), error = %err, "export write failed");
        return Err(AppError::Internal(format!(
            "export write failed for {}: {}",
            path.display(),
            err
        )));
    }
    Ok(())
}

fn read_index(dir: &Path) -> Option<ExportIndex> {
    read_json(&dir.join("index.json"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
