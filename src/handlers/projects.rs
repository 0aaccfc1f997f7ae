//! # Project Endpoints
//!
//! CRUD surface for projects plus the multipart audio upload and the export
//! history listing.

use crate::error::{AppError, AppResult};
use crate::multipart::{boundary_from_content_type, MultipartForm};
use crate::state::AppState;
use crate::store::ProjectUpdate;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Request body for creating a project.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(rename = "assignedTo", default)]
    pub assigned_to: String,
}

/// `POST /api/v1/projects`
pub async fn create_project(
    state: web::Data<AppState>,
    body: web::Json<CreateProjectRequest>,
) -> AppResult<HttpResponse> {
    let project = state.store.create(&body.name, &body.assigned_to)?;
    Ok(HttpResponse::Created().json(project))
}

/// `GET /api/v1/projects`
pub async fn list_projects(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "projects": state.store.list() })))
}

/// `GET /api/v1/projects/{id}`
pub async fn get_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let project = state.store.get(&path)?;
    Ok(HttpResponse::Ok().json(project))
}

/// `PUT /api/v1/projects/{id}`
pub async fn update_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ProjectUpdate>,
) -> AppResult<HttpResponse> {
    let project = state.store.update(&path, body.into_inner())?;
    Ok(HttpResponse::Ok().json(project))
}

/// `DELETE /api/v1/projects/{id}`
pub async fn delete_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    state.store.delete(&path)?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Project deleted successfully" })))
}

/// `POST /api/v1/projects/{id}/audio`: multipart upload of the project's
/// audio file under the `audio` field.
pub async fn upload_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
    request: HttpRequest,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    // 404 before parsing a potentially huge body for a dead project.
    state.store.get(&project_id)?;

    let form = parse_upload(&request, &body)?;
    let (filename, data) = form
        .file("audio")
        .ok_or_else(|| AppError::NoAudioProvided("missing 'audio' file part".to_string()))?;

    let record = state.store.save_audio(&project_id, data, filename)?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Audio file uploaded successfully",
        "file_path": record.file_path,
        "filename": record.original_name,
        "size_bytes": record.file_size,
        "mime_type": record.mime_type
    })))
}

/// `GET /api/v1/projects/{id}/exports`: version history plus best-effort
/// latest provenance.
pub async fn list_exports(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    state.store.get(&project_id)?;

    let history = state.archive.history(&project_id);
    let audio = state.store.latest_audio_record(&project_id);
    let base = audio
        .as_ref()
        .map(|record| crate::transcription::job::export_base(&record.original_name))
        .unwrap_or_else(|| "transcript".to_string());
    let provenance = state.archive.latest_provenance(
        &project_id,
        &base,
        audio
            .as_ref()
            .map(|record| (record.original_name.as_str(), record.file_path.as_str())),
    );

    Ok(HttpResponse::Ok().json(json!({
        "job_id": project_id,
        "versions": history,
        "provenance": provenance
    })))
}

/// Decode a multipart request into a form, translating framing problems
/// into 400-class errors.
pub(crate) fn parse_upload(request: &HttpRequest, body: &[u8]) -> AppResult<MultipartForm> {
    let content_type = request
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::MalformedRequest("missing content-type header".to_string()))?;

    let boundary = boundary_from_content_type(content_type)?;
    MultipartForm::parse(body, &boundary)
}
