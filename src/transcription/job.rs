//! # Transcription Jobs
//!
//! The externally observable operation "transcribe audio for job X with
//! parameters P". Composes the registry, engine controller, output
//! discovery, lexical correction, paragraph formatting and export archive
//! into one pipeline, and reports every terminal outcome to the project
//! store so failures are user-visible.
//!
//! No outcome here is retried automatically; a failed or timed-out job is
//! terminal and must be re-submitted by the caller as a new job.

use crate::error::{AppError, AppResult};
use crate::export::{ExportArchive, ExportRequest};
use crate::store::{ProjectStatus, ProjectStore, TranscriptionFields};
use crate::transcription::engine::WhisperEngine;
use crate::transcription::formatter::format_paragraphs;
use crate::transcription::lexicon::TermCorrector;
use crate::transcription::output::discover_transcript;
use crate::transcription::registry::{timeout_for, JobRegistry, JobTicket};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Caller-supplied transcription parameters, resolved against defaults.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    pub model: String,
    pub language: String,
    pub preview: bool,
    pub preview_duration: u32,
}

/// JSON body accepted by the transcribe endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionParams {
    pub model: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub preview: bool,
    #[serde(rename = "previewDuration")]
    pub preview_duration: Option<u32>,
}

/// Outcome of one transcription job, success or terminal failure.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    pub model: String,
    pub language: String,
    pub preview_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl TranscriptionRequest {
    /// Resolve optional caller params against configured defaults.
    pub fn resolve(
        audio_path: PathBuf,
        params: TranscriptionParams,
        default_model: &str,
        default_language: &str,
    ) -> Self {
        Self {
            audio_path,
            model: params.model.unwrap_or_else(|| default_model.to_string()),
            language: params
                .language
                .unwrap_or_else(|| default_language.to_string()),
            preview: params.preview,
            preview_duration: params.preview_duration.unwrap_or(60),
        }
    }
}

impl TranscriptionResult {
    fn failure(err: &AppError, request: &TranscriptionRequest) -> Self {
        Self {
            success: false,
            transcription: None,
            formatted_text: None,
            word_count: None,
            processing_time: None,
            model: request.model.clone(),
            language: request.language.clone(),
            preview_mode: request.preview,
            export_version: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Transcription service: one instance shared by all request handlers.
pub struct Transcriber {
    registry: Arc<JobRegistry>,
    engine: WhisperEngine,
    store: Arc<ProjectStore>,
    archive: Arc<ExportArchive>,
    corrector: TermCorrector,
}

impl Transcriber {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: WhisperEngine,
        store: Arc<ProjectStore>,
        archive: Arc<ExportArchive>,
        corrector: TermCorrector,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            archive,
            corrector,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run the full pipeline for one job.
    ///
    /// Returns `Err` only for request-level problems (a job already active
    /// under this id). Every terminal job outcome, success or failure, is
    /// returned as a `TranscriptionResult` and mirrored into the project
    /// store.
    pub async fn transcribe(
        &self,
        job_id: &str,
        request: TranscriptionRequest,
    ) -> AppResult<TranscriptionResult> {
        let ticket = self.registry.register(job_id)?;
        self.store.update_status(job_id, ProjectStatus::Processing);

        let outcome = self.run_pipeline(job_id, &ticket, &request).await;
        self.registry.remove(job_id);

        match outcome {
            Ok(result) => {
                info!(
                    job_id,
                    words = result.word_count,
                    export_version = result.export_version,
                    "transcription completed"
                );
                Ok(result)
            }
            Err(err) => {
                if err.is_cancellation() {
                    info!(job_id, "transcription cancelled");
                } else {
                    error!(job_id, kind = err.kind(), error = %err, "transcription failed");
                }
                self.store.record_error(job_id, &err.to_string());
                Ok(TranscriptionResult::failure(&err, &request))
            }
        }
    }

    /// Request cancellation of an active job. Absent ids are a no-op.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id)
    }

    async fn run_pipeline(
        &self,
        job_id: &str,
        ticket: &JobTicket,
        request: &TranscriptionRequest,
    ) -> AppResult<TranscriptionResult> {
        let started = Instant::now();

        // Preview mode processes a trimmed leading slice; trim failure falls
        // back to the full file rather than failing the job.
        let processed_path = if request.preview {
            match self
                .engine
                .trim_audio(&request.audio_path, request.preview_duration)
                .await
            {
                Some(trimmed) => trimmed,
                None => request.audio_path.clone(),
            }
        } else {
            request.audio_path.clone()
        };

        let file_size = std::fs::metadata(&processed_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let timeout = timeout_for(request.preview, file_size);

        let run = self
            .engine
            .run(
                &self.registry,
                ticket,
                &processed_path,
                &request.model,
                &request.language,
                timeout,
            )
            .await;

        // A trimmed preview copy is transient; drop it whatever happened.
        if processed_path != request.audio_path {
            if let Err(err) = std::fs::remove_file(&processed_path) {
                warn!(path = %processed_path.display(), error = %err, "could not delete trimmed copy");
            }
        }
        let run = run?;

        // The process may have finished legitimately at nearly the same
        // instant a cancellation arrived; the flag decides.
        ensure_not_cancelled(ticket)?;

        if !run.stdout.trim().is_empty() {
            tracing::debug!(job_id, stdout_len = run.stdout.len(), "engine stdout captured");
        }

        let raw = discover_transcript(
            self.engine.work_dir(),
            &processed_path,
            &request.audio_path,
        )?;

        let corrected = self.corrector.correct(&raw);
        let formatted = format_paragraphs(&corrected);
        let word_count = corrected.split_whitespace().count() as u64;
        let processing_time = started.elapsed().as_secs_f64();

        let audio = self.store.latest_audio_record(job_id);
        let (original_name, stored_name, source_path) = match &audio {
            Some(record) => (
                record.original_name.clone(),
                Path::new(&record.file_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                record.file_path.clone(),
            ),
            None => (
                request
                    .audio_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                String::new(),
                request.audio_path.to_string_lossy().into_owned(),
            ),
        };

        let note = if request.preview {
            format!(
                "Automatic transcription ({}, {}, preview {}s)",
                request.model, request.language, request.preview_duration
            )
        } else {
            format!(
                "Automatic transcription ({}, {})",
                request.model, request.language
            )
        };

        let export = self
            .archive
            .export(ExportRequest {
                job_id: job_id.to_string(),
                base: export_base(&original_name),
                content: formatted.clone(),
                actor: "system".to_string(),
                note,
                original_filename: original_name,
                stored_filename: stored_name,
                source_path,
                model: request.model.clone(),
            })
            .await?;

        self.store.record_transcription(
            job_id,
            TranscriptionFields {
                transcription: corrected.clone(),
                formatted_text: formatted.clone(),
                word_count,
                processing_time,
                is_preview: request.preview,
            },
        );

        Ok(TranscriptionResult {
            success: true,
            transcription: Some(corrected),
            formatted_text: Some(formatted),
            word_count: Some(word_count),
            processing_time: Some(processing_time),
            model: request.model.clone(),
            language: request.language.clone(),
            preview_mode: request.preview,
            export_version: Some(export.version),
            error: None,
            error_kind: None,
        })
    }
}

/// Refuse to publish a success for a job whose cancellation flag was set.
fn ensure_not_cancelled(ticket: &JobTicket) -> AppResult<()> {
    if ticket.was_cancelled() {
        Err(AppError::ProcessCancelled)
    } else {
        Ok(())
    }
}

/// Artifact base name derived from the original upload's stem.
pub fn export_base(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("transcript");
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "transcript".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    fn build_transcriber(dir: &TempDir, engine_script: Option<PathBuf>) -> (Transcriber, Arc<ProjectStore>) {
        let mut engine_config = AppConfig::default().engine;
        engine_config.binary = engine_script.map(|p| p.to_string_lossy().into_owned());
        // A trimmer that cannot exist, so preview runs exercise the
        // full-file fallback deterministically.
        engine_config.trimmer = dir
            .path()
            .join("missing-trimmer")
            .to_string_lossy()
            .into_owned();

        let work_dir = dir.path().join("work");
        std::fs::create_dir_all(&work_dir).unwrap();
        let store = Arc::new(ProjectStore::new(dir.path().join("uploads")));
        let transcriber = Transcriber::new(
            Arc::new(JobRegistry::new()),
            WhisperEngine::new(engine_config, work_dir),
            store.clone(),
            Arc::new(ExportArchive::new(dir.path().join("exports"))),
            TermCorrector::pali(),
        );
        (transcriber, store)
    }

    #[cfg(unix)]
    fn write_script(dir: &TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn preview_request(audio: PathBuf, model: &str) -> TranscriptionRequest {
        TranscriptionRequest {
            audio_path: audio,
            model: model.to_string(),
            language: "English".to_string(),
            preview: true,
            preview_duration: 10,
        }
    }

    #[test]
    fn test_export_base_sanitizes() {
        assert_eq!(export_base("dhamma talk #3.mp3"), "dhamma_talk__3");
        assert_eq!(export_base("simple.wav"), "simple");
        assert_eq!(export_base(""), "transcript");
    }

    #[test]
    fn test_cancellation_race_is_published_as_cancelled() {
        // Cancel arriving after the process exited but before the result is
        // published must still surface as a cancellation, never success.
        let registry = JobRegistry::new();
        let ticket = registry.register("job-race").unwrap();

        // Process "finished"; now the cancel lands.
        registry.cancel("job-race");

        let err = ensure_not_cancelled(&ticket).unwrap_err();
        assert_eq!(err.kind(), "process_cancelled");
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let request = TranscriptionRequest::resolve(
            PathBuf::from("a.mp3"),
            TranscriptionParams::default(),
            "medium",
            "English",
        );
        assert_eq!(request.model, "medium");
        assert_eq!(request.language, "English");
        assert!(!request.preview);
        assert_eq!(request.preview_duration, 60);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_end_to_end_preview_run() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "base=$(basename \"$1\"); stem=\"${base%.*}\"; \
             echo \"the buddha taught dharma to the sangha. however the monks kept asking.\" > \"$stem.txt\"",
        );
        let (transcriber, store) = build_transcriber(&dir, Some(script));

        let project = store.create("Evening Talk", "").unwrap();
        let record = store
            .save_audio(&project.id, b"ten seconds of synthetic audio", "evening_talk.mp3")
            .unwrap();

        let result = transcriber
            .transcribe(
                &project.id,
                preview_request(PathBuf::from(&record.file_path), "tiny"),
            )
            .await
            .unwrap();

        assert!(result.success, "expected success, got {:?}", result.error);
        assert!(result.preview_mode);
        assert_eq!(result.export_version, Some(1));
        assert_eq!(result.model, "tiny");

        let corrected = result.transcription.unwrap();
        assert!(corrected.contains("Buddha taught Dhamma to the Saṅgha"));
        // The discourse marker opens a second paragraph.
        assert!(result.formatted_text.unwrap().contains("\n\nhowever"));

        let project = store.get(&project.id).unwrap();
        assert_eq!(project.status, ProjectStatus::NeedsReview);
        assert!(project.is_preview);
        assert!(project.word_count > 0);

        // Terminal transition removed the job from the registry.
        assert_eq!(transcriber.registry().active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_failure_updates_store() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo model not available >&2; exit 2");
        let (transcriber, store) = build_transcriber(&dir, Some(script));

        let project = store.create("Broken", "").unwrap();
        let record = store.save_audio(&project.id, b"bytes", "talk.mp3").unwrap();

        let result = transcriber
            .transcribe(
                &project.id,
                preview_request(PathBuf::from(&record.file_path), "tiny"),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_kind, Some("engine_execution_failed"));
        assert!(result.error.unwrap().contains("model not available"));

        let project = store.get(&project.id).unwrap();
        assert_eq!(project.status, ProjectStatus::Error);
        assert!(project.error_message.is_some());
        assert_eq!(transcriber.registry().active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_output_is_terminal_failure() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "exit 0");
        let (transcriber, store) = build_transcriber(&dir, Some(script));

        let project = store.create("Silent", "").unwrap();
        let record = store.save_audio(&project.id, b"bytes", "talk.mp3").unwrap();

        let result = transcriber
            .transcribe(
                &project.id,
                preview_request(PathBuf::from(&record.file_path), "tiny"),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_kind, Some("no_transcript_produced"));
        assert_eq!(
            store.get(&project.id).unwrap().status,
            ProjectStatus::Error
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duplicate_job_is_rejected_without_store_damage() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "exit 0");
        let (transcriber, store) = build_transcriber(&dir, Some(script));

        let project = store.create("Busy", "").unwrap();
        let _ticket = transcriber.registry().register(&project.id).unwrap();

        let err = transcriber
            .transcribe(&project.id, preview_request(PathBuf::from("x.mp3"), "tiny"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        // The pre-existing registration stays active.
        assert!(transcriber.registry().is_active(&project.id));
    }
}
