//! # Transcription Endpoints
//!
//! The job entry points: start a transcription for a project, cancel one,
//! and the legacy one-shot `/process` route that takes the audio and its
//! parameters in a single multipart request.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::{TranscriptionParams, TranscriptionRequest, TranscriptionResult};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// `POST /api/v1/projects/{id}/transcribe`
///
/// Body is optional JSON: `{"model", "language", "preview",
/// "previewDuration"}`. Returns the terminal `TranscriptionResult`; the
/// request blocks until the job reaches a terminal state.
pub async fn transcribe_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: Option<web::Json<TranscriptionParams>>,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    let project = state.store.get(&project_id)?;

    let audio_path = project.audio_file_path.ok_or_else(|| {
        AppError::NoAudioProvided(format!("no audio uploaded for project {}", project_id))
    })?;

    let config = state.get_config();
    let request = TranscriptionRequest::resolve(
        PathBuf::from(audio_path),
        params.map(|p| p.into_inner()).unwrap_or_default(),
        &config.engine.default_model,
        &config.engine.default_language,
    );

    info!(
        project_id = %project_id,
        model = %request.model,
        language = %request.language,
        preview = request.preview,
        "transcription requested"
    );

    state.record_job_started();
    let result = state.transcriber.transcribe(&project_id, request).await?;
    record_outcome(&state, &result);

    Ok(HttpResponse::Ok().json(result))
}

/// `POST /api/v1/projects/{id}/cancel`
///
/// Idempotent: cancelling a job that is not running reports success with
/// nothing to do.
pub async fn cancel_transcription(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    let cancelled = state.transcriber.cancel(&project_id);
    if cancelled {
        state.record_job_cancelled();
    }

    Ok(HttpResponse::Ok().json(json!({
        "cancelled": cancelled,
        "message": if cancelled {
            "Cancellation requested"
        } else {
            "No active transcription for this job"
        }
    })))
}

/// `POST /api/v1/process`: legacy one-shot route.
///
/// Multipart body carrying the `audio` file plus optional `model`,
/// `language`, `preview`, `preview_duration` and `projectId` text fields.
/// When a project id is supplied the audio is attached to that project and
/// results land in the store; otherwise the upload is transient and removed
/// after processing.
pub async fn process_audio(
    state: web::Data<AppState>,
    request: HttpRequest,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let form = super::projects::parse_upload(&request, &body)?;

    let (filename, data) = form
        .file("audio")
        .ok_or_else(|| AppError::NoAudioProvided("missing 'audio' file part".to_string()))?;

    let params = TranscriptionParams {
        model: form.field("model").map(str::to_string),
        language: form.field("language").map(str::to_string),
        preview: form
            .field_or("preview", "false")
            .eq_ignore_ascii_case("true"),
        preview_duration: form.field("preview_duration").and_then(|v| v.parse().ok()),
    };
    let project_id = form.field("projectId").map(str::to_string);

    // Attach the upload to its project when one was named, otherwise stage
    // it as a transient file keyed by a fresh job id.
    let (job_id, audio_path, transient) = match &project_id {
        Some(id) => {
            let record = state.store.save_audio(id, data, filename)?;
            (id.clone(), PathBuf::from(record.file_path), false)
        }
        None => {
            let config = state.get_config();
            let extension = std::path::Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("wav")
                .to_lowercase();
            let job_id = uuid::Uuid::new_v4().to_string();
            let staged = PathBuf::from(&config.storage.uploads_dir)
                .join(format!("{}.{}", job_id, extension));
            std::fs::create_dir_all(&config.storage.uploads_dir)?;
            std::fs::write(&staged, data)?;
            (job_id, staged, true)
        }
    };

    let config = state.get_config();
    let transcription_request = TranscriptionRequest::resolve(
        audio_path.clone(),
        params,
        &config.engine.default_model,
        &config.engine.default_language,
    );

    state.record_job_started();
    let outcome = state
        .transcriber
        .transcribe(&job_id, transcription_request)
        .await;

    if transient {
        if let Err(err) = std::fs::remove_file(&audio_path) {
            tracing::warn!(path = %audio_path.display(), error = %err, "could not delete staged upload");
        }
    }

    let result = outcome?;
    record_outcome(&state, &result);
    Ok(HttpResponse::Ok().json(result))
}

fn record_outcome(state: &web::Data<AppState>, result: &TranscriptionResult) {
    if result.success {
        return;
    }
    if result.error_kind == Some("process_cancelled") {
        state.record_job_cancelled();
    } else {
        state.record_job_failed();
    }
}
