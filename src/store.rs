//! # Project Store
//!
//! Row store for projects and their uploaded audio records. The
//! transcription core only talks to this through a narrow surface (status
//! updates, result fields, and audio metadata lookups), so the backing
//! implementation can be swapped without touching the pipeline. This one
//! keeps rows in memory and audio payloads on disk under the uploads
//! directory.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Workflow status of a project. The wire strings are part of the frontend
/// contract and must not change casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "Needs_Review")]
    NeedsReview,
    #[serde(rename = "Error")]
    Error,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProjectStatus::New => "new",
            ProjectStatus::Processing => "processing",
            ProjectStatus::NeedsReview => "Needs_Review",
            ProjectStatus::Error => "Error",
        };
        write!(f, "{}", label)
    }
}

/// One project row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub assigned_to: String,
    pub status: ProjectStatus,
    pub audio_file_name: Option<String>,
    pub audio_file_path: Option<String>,
    pub transcription: Option<String>,
    pub formatted_text: Option<String>,
    pub word_count: u64,
    pub processing_time: Option<f64>,
    pub is_preview: bool,
    pub error_message: Option<String>,
    pub created: String,
    pub updated: String,
}

/// One stored audio upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub id: String,
    pub project_id: String,
    pub original_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub created: String,
}

/// Partial update accepted by the project update endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<String>,
    pub status: Option<ProjectStatus>,
    pub transcription: Option<String>,
    pub formatted_text: Option<String>,
    pub word_count: Option<u64>,
    pub error_message: Option<String>,
}

/// Fields written back after a finished transcription.
#[derive(Debug, Clone)]
pub struct TranscriptionFields {
    pub transcription: String,
    pub formatted_text: String,
    pub word_count: u64,
    pub processing_time: f64,
    pub is_preview: bool,
}

/// In-memory project/audio store with on-disk upload payloads.
pub struct ProjectStore {
    projects: RwLock<HashMap<String, Project>>,
    audio_records: RwLock<Vec<AudioRecord>>,
    uploads_dir: PathBuf,
}

impl ProjectStore {
    pub fn new(uploads_dir: PathBuf) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            audio_records: RwLock::new(Vec::new()),
            uploads_dir,
        }
    }

    /// Create a project, suffixing the name with `_1`, `_2`, … when the
    /// requested name is already taken.
    pub fn create(&self, name: &str, assigned_to: &str) -> AppResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("project name is required".to_string()));
        }

        let mut projects = self.projects.write().unwrap();
        let unique_name = unique_name(name, &projects);
        let now = chrono::Utc::now().to_rfc3339();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: unique_name.clone(),
            assigned_to: assigned_to.trim().to_string(),
            status: ProjectStatus::New,
            audio_file_name: None,
            audio_file_path: None,
            transcription: None,
            formatted_text: None,
            word_count: 0,
            processing_time: None,
            is_preview: false,
            error_message: None,
            created: now.clone(),
            updated: now,
        };

        projects.insert(project.id.clone(), project.clone());
        info!(project_id = %project.id, name = %unique_name, "project created");
        Ok(project)
    }

    pub fn get(&self, id: &str) -> AppResult<Project> {
        self.projects
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))
    }

    /// All projects, newest first.
    pub fn list(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.read().unwrap().values().cloned().collect();
        projects.sort_by(|a, b| b.created.cmp(&a.created));
        projects
    }

    /// Apply a partial update and return the new row.
    pub fn update(&self, id: &str, update: ProjectUpdate) -> AppResult<Project> {
        let mut projects = self.projects.write().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))?;

        if let Some(name) = update.name {
            project.name = name;
        }
        if let Some(assigned_to) = update.assigned_to {
            project.assigned_to = assigned_to;
        }
        if let Some(status) = update.status {
            project.status = status;
        }
        if let Some(transcription) = update.transcription {
            project.transcription = Some(transcription);
        }
        if let Some(formatted_text) = update.formatted_text {
            project.formatted_text = Some(formatted_text);
        }
        if let Some(word_count) = update.word_count {
            project.word_count = word_count;
        }
        if let Some(error_message) = update.error_message {
            project.error_message = Some(error_message);
        }
        project.updated = chrono::Utc::now().to_rfc3339();

        Ok(project.clone())
    }

    /// Delete a project and its stored audio payloads.
    pub fn delete(&self, id: &str) -> AppResult<()> {
        let removed = self
            .projects
            .write()
            .unwrap()
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))?;

        let mut audio_records = self.audio_records.write().unwrap();
        audio_records.retain(|record| {
            if record.project_id != id {
                return true;
            }
            if let Err(err) = std::fs::remove_file(&record.file_path) {
                warn!(path = %record.file_path, error = %err, "could not delete audio file");
            }
            false
        });

        info!(project_id = %id, name = %removed.name, "project deleted");
        Ok(())
    }

    /// Store an uploaded audio payload under a fresh unique filename and
    /// attach it to the project.
    pub fn save_audio(
        &self,
        project_id: &str,
        data: &[u8],
        original_name: &str,
    ) -> AppResult<AudioRecord> {
        // Row must exist before any bytes hit the disk.
        self.get(project_id)?;

        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav")
            .to_lowercase();
        let file_id = uuid::Uuid::new_v4().to_string();
        let file_path = self.uploads_dir.join(format!("{}.{}", file_id, extension));

        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::write(&file_path, data)?;

        let record = AudioRecord {
            id: file_id,
            project_id: project_id.to_string(),
            original_name: original_name.to_string(),
            file_path: file_path.to_string_lossy().into_owned(),
            file_size: data.len() as u64,
            mime_type: mime_for_extension(&extension).to_string(),
            created: chrono::Utc::now().to_rfc3339(),
        };

        self.audio_records.write().unwrap().push(record.clone());

        {
            let mut projects = self.projects.write().unwrap();
            if let Some(project) = projects.get_mut(project_id) {
                project.audio_file_name = Some(original_name.to_string());
                project.audio_file_path = Some(record.file_path.clone());
                project.updated = chrono::Utc::now().to_rfc3339();
            }
        }

        info!(
            project_id,
            original_name,
            stored = %record.file_path,
            bytes = record.file_size,
            "audio stored"
        );
        Ok(record)
    }

    /// Most recently uploaded audio record for a project.
    pub fn latest_audio_record(&self, project_id: &str) -> Option<AudioRecord> {
        self.audio_records
            .read()
            .unwrap()
            .iter()
            .rev()
            .find(|record| record.project_id == project_id)
            .cloned()
    }

    /// Set the workflow status; every terminal job outcome lands here so the
    /// state is user-visible.
    pub fn update_status(&self, project_id: &str, status: ProjectStatus) {
        let mut projects = self.projects.write().unwrap();
        if let Some(project) = projects.get_mut(project_id) {
            debug!(project_id, from = %project.status, to = %status, "status change");
            project.status = status;
            project.updated = chrono::Utc::now().to_rfc3339();
        }
    }

    /// Record a failed job's error message alongside the Error status.
    pub fn record_error(&self, project_id: &str, message: &str) {
        let mut projects = self.projects.write().unwrap();
        if let Some(project) = projects.get_mut(project_id) {
            project.status = ProjectStatus::Error;
            project.error_message = Some(message.to_string());
            project.updated = chrono::Utc::now().to_rfc3339();
        }
    }

    /// Write a successful transcription's result fields.
    pub fn record_transcription(&self, project_id: &str, fields: TranscriptionFields) {
        let mut projects = self.projects.write().unwrap();
        if let Some(project) = projects.get_mut(project_id) {
            project.transcription = Some(fields.transcription);
            project.formatted_text = Some(fields.formatted_text);
            project.word_count = fields.word_count;
            project.processing_time = Some(fields.processing_time);
            project.is_preview = fields.is_preview;
            project.error_message = None;
            project.status = ProjectStatus::NeedsReview;
            project.updated = chrono::Utc::now().to_rfc3339();
        }
    }

    pub fn count(&self) -> usize {
        self.projects.read().unwrap().len()
    }
}

/// Append `_1`, `_2`, … until the name is unique among existing projects.
fn unique_name(base: &str, projects: &HashMap<String, Project>) -> String {
    let taken: Vec<&str> = projects.values().map(|p| p.name.as_str()).collect();
    if !taken.contains(&base) {
        return base.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{}_{}", base, counter);
        if !taken.contains(&candidate.as_str()) {
            return candidate;
        }
        counter += 1;
    }
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ProjectStore {
        ProjectStore::new(dir.path().to_path_buf())
    }

    #[test]
    fn test_create_and_get() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let project = store.create("Morning Talk", "alex").unwrap();
        assert_eq!(project.status, ProjectStatus::New);

        let fetched = store.get(&project.id).unwrap();
        assert_eq!(fetched.name, "Morning Talk");
        assert_eq!(fetched.assigned_to, "alex");
    }

    #[test]
    fn test_duplicate_names_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let a = store.create("Talk", "").unwrap();
        let b = store.create("Talk", "").unwrap();
        let c = store.create("Talk", "").unwrap();
        assert_eq!(a.name, "Talk");
        assert_eq!(b.name, "Talk_1");
        assert_eq!(c.name, "Talk_2");
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.create("   ", "").is_err());
    }

    #[test]
    fn test_save_audio_writes_payload_and_links_project() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();

        let record = store
            .save_audio(&project.id, b"fake audio bytes", "dhamma_talk.mp3")
            .unwrap();
        assert_eq!(record.mime_type, "audio/mpeg");
        assert_eq!(record.file_size, 16);
        assert_eq!(std::fs::read(&record.file_path).unwrap(), b"fake audio bytes");

        let project = store.get(&project.id).unwrap();
        assert_eq!(project.audio_file_name.as_deref(), Some("dhamma_talk.mp3"));
        assert_eq!(project.audio_file_path.as_deref(), Some(record.file_path.as_str()));
    }

    #[test]
    fn test_latest_audio_record_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();

        store.save_audio(&project.id, b"one", "first.mp3").unwrap();
        store.save_audio(&project.id, b"two", "second.mp3").unwrap();

        let latest = store.latest_audio_record(&project.id).unwrap();
        assert_eq!(latest.original_name, "second.mp3");
    }

    #[test]
    fn test_delete_removes_row_and_payload() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();
        let record = store.save_audio(&project.id, b"bytes", "t.wav").unwrap();

        store.delete(&project.id).unwrap();
        assert!(store.get(&project.id).is_err());
        assert!(!Path::new(&record.file_path).exists());
        assert!(store.latest_audio_record(&project.id).is_none());
    }

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::NeedsReview).unwrap(),
            "\"Needs_Review\""
        );
        assert_eq!(serde_json::to_string(&ProjectStatus::Error).unwrap(), "\"Error\"");
        assert_eq!(serde_json::to_string(&ProjectStatus::New).unwrap(), "\"new\"");
        assert_eq!(
            serde_json::to_string(&ProjectStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_record_transcription_sets_review_status() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();

        store.record_transcription(
            &project.id,
            TranscriptionFields {
                transcription: "raw".to_string(),
                formatted_text: "formatted".to_string(),
                word_count: 2,
                processing_time: 1.25,
                is_preview: true,
            },
        );

        let project = store.get(&project.id).unwrap();
        assert_eq!(project.status, ProjectStatus::NeedsReview);
        assert_eq!(project.word_count, 2);
        assert!(project.is_preview);
        assert!(project.error_message.is_none());
    }

    #[test]
    fn test_record_error_sets_error_status() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();

        store.record_error(&project.id, "engine exploded");
        let project = store.get(&project.id).unwrap();
        assert_eq!(project.status, ProjectStatus::Error);
        assert_eq!(project.error_message.as_deref(), Some("engine exploded"));
    }

    #[test]
    fn test_partial_update() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let project = store.create("Talk", "").unwrap();

        let updated = store
            .update(
                &project.id,
                ProjectUpdate {
                    status: Some(ProjectStatus::Processing),
                    word_count: Some(99),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, ProjectStatus::Processing);
        assert_eq!(updated.word_count, 99);
        // Untouched fields survive.
        assert_eq!(updated.name, "Talk");
    }
}
