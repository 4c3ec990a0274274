use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, State, multipart::Field, multipart::MultipartError},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::content::{NO_INDEX_MESSAGE, Resolution, SiteContent};
use crate::errors::{ExtractError, ProvisionError, RegistryError};
use crate::provision::{LaunchReport, Provisioner, UploadRequest};
use crate::registry::Site;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub provisioner: Provisioner,
    pub content: SiteContent,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            provisioner: Provisioner::new(&config),
            content: SiteContent::new(&config.storage_root),
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Form field names ──────────────────────────────────────────────────

const FIELD_ARCHIVE: &str = "projectZip";
const FIELD_NAME: &str = "webName";
const FIELD_START: &str = "startCmd";
const FIELD_BUILD: &str = "buildCmd";
const FIELD_DEPLOY: &str = "deploy";

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct UploadResponse {
    pub site: Site,
    pub launch: LaunchReport,
    pub files: usize,
    pub url: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Validation(msg) => ApiError::BadRequest(msg),
            ProvisionError::Extract(ExtractError::PathEscape { entry }) => {
                ApiError::BadRequest(format!("Archive entry '{}' escapes the site directory", entry))
            }
            ProvisionError::Extract(e @ ExtractError::SizeLimit { .. }) => {
                ApiError::PayloadTooLarge(e.to_string())
            }
            ProvisionError::Extract(e @ ExtractError::CorruptArchive(_)) => {
                ApiError::Internal(format!("Upload failed: {}", e))
            }
            other => {
                error!(error = %other, "Upload failed");
                ApiError::Internal("Upload failed: storage error".into())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { directory_name } => {
                ApiError::NotFound(format!("Site '{}' not found", directory_name))
            }
            RegistryError::InvalidDirectoryName(name) => {
                ApiError::BadRequest(format!("Invalid site name '{}'", name))
            }
            RegistryError::MetadataCorrupt { .. } => {
                error!(error = %err, "Corrupt site metadata");
                ApiError::Internal("Site metadata is corrupt".into())
            }
            RegistryError::Io { .. } => {
                error!(error = %err, "Registry I/O failure");
                ApiError::Internal("Storage error".into())
            }
        }
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Background task failed: {}", e)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(upload_form))
        .route("/upload", post(upload))
        .route("/sites", get(list_sites))
        .route("/sites/{directory}", get(get_site))
        .route("/site/{directory}", get(serve_site_root))
        .route("/site/{directory}/", get(serve_site_root))
        .route("/site/{directory}/{*path}", get(serve_site_file))
        .route("/health", get(health_check))
}

// ── Upload form parsing ───────────────────────────────────────────────

/// An archive streamed into the uploads directory.
struct StagedArchive {
    path: PathBuf,
    stored_name: String,
}

impl StagedArchive {
    async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged archive");
        }
    }
}

#[derive(Default)]
struct UploadForm {
    archive: Option<StagedArchive>,
    web_name: Option<String>,
    start_cmd: Option<String>,
    deploy: Option<bool>,
}

impl UploadForm {
    async fn discard_archive(&mut self) {
        if let Some(archive) = self.archive.take() {
            archive.remove().await;
        }
    }
}

/// Checkbox-style flag: absent means unset, anything but an explicit "off" is on.
/// The form pairs the checkbox with a hidden `false` so an unchecked box still
/// arrives; the last value read wins.
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "off" | "no"
    )
}

async fn read_fields(
    config: &Config,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_ARCHIVE => {
                if let Some(staged) = stage_archive(config, field).await? {
                    form.discard_archive().await;
                    form.archive = Some(staged);
                }
            }
            FIELD_NAME => form.web_name = Some(field.text().await.map_err(multipart_error)?),
            FIELD_START => form.start_cmd = Some(field.text().await.map_err(multipart_error)?),
            FIELD_DEPLOY => {
                let value = field.text().await.map_err(multipart_error)?;
                form.deploy = Some(parse_flag(&value));
            }
            FIELD_BUILD => debug!("Ignoring build command; builds are not run"),
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }
    Ok(())
}

/// Stream a file field to `<uploads_dir>/<uuid>.zip`, enforcing the upload cap.
/// An empty field with no file name (a file input left blank) stages nothing.
async fn stage_archive(
    config: &Config,
    mut field: Field<'_>,
) -> Result<Option<StagedArchive>, ApiError> {
    let has_file_name = field.file_name().is_some_and(|n| !n.is_empty());
    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create uploads directory");
            ApiError::Internal("Storage error".into())
        })?;

    let stored_name = format!("{}.zip", Uuid::new_v4());
    let staged = StagedArchive {
        path: config.uploads_dir.join(&stored_name),
        stored_name,
    };

    let written = match write_field(config, &mut field, &staged.path).await {
        Ok(written) => written,
        Err(e) => {
            staged.remove().await;
            return Err(e);
        }
    };

    if written == 0 && !has_file_name {
        staged.remove().await;
        return Ok(None);
    }
    debug!(archive = %staged.stored_name, bytes = written, "Staged upload");
    Ok(Some(staged))
}

async fn write_field(
    config: &Config,
    field: &mut Field<'_>,
    path: &std::path::Path,
) -> Result<u64, ApiError> {
    let storage_error = |e: std::io::Error| {
        error!(path = %path.display(), error = %e, "Failed to stage upload");
        ApiError::Internal("Storage error".into())
    };

    let mut file = tokio::fs::File::create(path).await.map_err(storage_error)?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > config.upload_limit_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "Upload exceeds the limit of {} bytes",
                config.upload_limit_bytes
            )));
        }
        file.write_all(&chunk).await.map_err(storage_error)?;
    }
    file.flush().await.map_err(storage_error)?;
    Ok(written)
}

/// Run a provisioning job on the blocking pool. The staged archive is removed
/// whenever the job does not succeed, including when the task itself dies.
async fn run_staged<T, F>(archive: &StagedArchive, job: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ProvisionError> + Send + 'static,
    T: Send + 'static,
{
    let outcome = match blocking(job).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(e),
    };
    if outcome.is_err() {
        archive.remove().await;
    }
    outcome
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}

async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = UploadForm::default();
    if let Err(e) = read_fields(&state.config, &mut multipart, &mut form).await {
        form.discard_archive().await;
        return Err(e);
    }

    let Some(archive) = form.archive.take() else {
        return Err(ApiError::BadRequest(
            "No file uploaded. Use a .zip of your project.".into(),
        ));
    };
    let web_name = form.web_name.unwrap_or_default();
    if web_name.trim().is_empty() {
        archive.remove().await;
        return Err(ApiError::BadRequest("Web name is required.".into()));
    }

    let request = UploadRequest {
        archive_path: archive.path.clone(),
        display_name: web_name,
        start_command: form.start_cmd,
        deploy: form.deploy,
        source_archive_ref: archive.stored_name.clone(),
    };
    let provisioner = state.provisioner.clone();
    let provisioned = run_staged(&archive, move || provisioner.provision(request)).await?;

    let url = format!("/site/{}/", provisioned.site.directory_name);
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            site: provisioned.site,
            launch: provisioned.launch,
            files: provisioned.summary.files,
            url,
        }),
    ))
}

async fn list_sites(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let provisioner = state.provisioner.clone();
    let sites = blocking(move || provisioner.registry().sites()).await??;
    Ok(Json(sites))
}

async fn get_site(
    State(state): State<SharedState>,
    Path(directory): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provisioner = state.provisioner.clone();
    let site = blocking(move || provisioner.registry().get_site(&directory)).await??;
    Ok(Json(site))
}

async fn serve_site_root(
    State(state): State<SharedState>,
    Path(directory): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, directory, String::new()).await
}

async fn serve_site_file(
    State(state): State<SharedState>,
    Path((directory, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    serve(&state, directory, path).await
}

async fn serve(
    state: &SharedState,
    directory: String,
    sub_path: String,
) -> Result<Response, ApiError> {
    let content = state.content.clone();
    let resolution = blocking(move || content.resolve(&directory, &sub_path)).await?;

    match resolution {
        Resolution::File(path) => {
            let file = tokio::fs::File::open(&path).await.map_err(|e| {
                error!(path = %path.display(), error = %e, "Failed to open site file");
                ApiError::NotFound("Not found".into())
            })?;
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            let body = Body::from_stream(ReaderStream::new(file));
            Ok(([(header::CONTENT_TYPE, mime.as_ref().to_string())], body).into_response())
        }
        Resolution::NoIndexFallback => Ok((StatusCode::OK, NO_INDEX_MESSAGE).into_response()),
        Resolution::NotFound => Err(ApiError::NotFound("Not found".into())),
        Resolution::Rejected(reason) => Err(ApiError::BadRequest(format!("Invalid path: {}", reason))),
    }
}

const UPLOAD_FORM: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>siterunner</title></head>
<body>
<h1>Upload a project</h1>
<form action="/upload" method="post" enctype="multipart/form-data">
  <p><label>Web name <input name="webName" required></label></p>
  <p><label>Project zip <input type="file" name="projectZip" accept=".zip" required></label></p>
  <p><label>Start command <input name="startCmd" placeholder="npm start"></label></p>
  <input type="hidden" name="deploy" value="false">
  <p><label><input type="checkbox" name="deploy" value="true" checked> Start after upload</label></p>
  <p><button type="submit">Upload</button></p>
</form>
<p><a href="/sites">View sites</a></p>
</body>
</html>
"#;
