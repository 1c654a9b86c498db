use std::collections::HashMap;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header::{Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{self, Auth};
use crate::config::AppConfig;
use crate::error::{ApiError, ApiErrorBody};
use crate::intake::Upload;
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::storage::{sanitize_filename, AttachmentStore, StorageError, ALLOWED_EXTENSIONS};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/register").route(web::post().to(register)))
        .service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/logout").route(web::post().to(logout)))
        .service(web::resource("/status").route(web::get().to(status)))
        .service(
            web::resource("/config/allowed_extensions").route(web::get().to(allowed_extensions)),
        )
        .service(
            web::resource("/log_records")
                .route(web::get().to(list_log_records))
                .route(web::post().to(create_log_record)),
        )
        .service(
            web::resource("/log_records/{id}")
                .route(web::get().to(get_log_record))
                .route(web::put().to(update_log_record))
                .route(web::delete().to(delete_log_record)),
        )
        .service(
            web::resource("/log_records/{id}/attachments")
                .route(web::get().to(list_record_attachments))
                .route(web::post().to(upload_attachments)),
        )
        // GET is keyed by stored filename and public; DELETE by id and gated
        .service(
            web::resource("/attachments/{key}")
                .route(web::get().to(download_attachment))
                .route(web::delete().to(delete_attachment)),
        );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub files: Arc<dyn AttachmentStore>,
    pub config: Arc<AppConfig>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedResponse {
    pub message: String,
    pub id: Id,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub message: String,
    pub username: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub message: String,
    pub authenticated: bool,
    pub username: Option<String>,
}

/// Multipart layout accepted by record create/update (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct LogRecordForm {
    #[schema(example = "2025-01-10")]
    date_of_incident: String,
    #[schema(example = "14:30")]
    time_of_incident: Option<String>,
    category: String,
    description_of_incident: String,
    /// JSON array string
    #[schema(example = r#"["financial"]"#)]
    impact_types: String,
    impact_details: Option<String>,
    supporting_evidence_snippet: Option<String>,
    exhibit_reference: Option<String>,
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
}

fn message(text: impl Into<String>) -> MessageResponse {
    MessageResponse { message: text.into() }
}

// ---------------- multipart ----------------

#[derive(Default)]
struct ParsedForm {
    fields: HashMap<String, String>,
    uploads: Vec<Upload>,
}

/// Buffer a multipart body: text parts become fields, `files` parts become
/// uploads. Bodies above `limit` bytes are refused.
async fn read_form(mut payload: Multipart, limit: usize) -> Result<ParsedForm, ApiError> {
    let mut form = ParsedForm::default();
    let mut total = 0usize;
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::warn!("multipart error: {e}");
        ApiError::BadRequest("Malformed multipart body".into())
    })? {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);
        let content_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::warn!("multipart stream error: {e}");
            ApiError::BadRequest("Malformed multipart body".into())
        })? {
            total += chunk.len();
            if total > limit {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }

        match filename {
            Some(filename) if name == "files" => form.uploads.push(Upload { filename, content_type, bytes }),
            Some(_) => log::debug!("ignoring file part '{name}'"),
            None => {
                let value = String::from_utf8(bytes)
                    .map_err(|_| ApiError::BadRequest(format!("Field {name} is not valid UTF-8")))?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

// ---------------- session ----------------

#[utoipa::path(
    post,
    path = "/register",
    request_body = Credentials,
    responses(
        (status = 201, description = "User registered and logged in", body = SessionResponse),
        (status = 400, description = "Missing username or password", body = ApiErrorBody),
        (status = 409, description = "Username already exists", body = ApiErrorBody)
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<Credentials>) -> Result<HttpResponse, ApiError> {
    let (username, password) = payload
        .into_inner()
        .checked()
        .ok_or_else(|| ApiError::BadRequest("Username and password are required".into()))?;
    match data.repo.find_user_by_username(&username).await {
        Ok(_) => return Err(ApiError::Conflict("Username already exists".into())),
        Err(RepoError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let hash = auth::hash_password(&password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let user = data.repo.create_user(&username, &hash).await.map_err(|e| match e {
        // lost a race with another registration
        RepoError::Conflict => ApiError::Conflict("Username already exists".into()),
        other => other.into(),
    })?;
    let token = auth::create_session_token(&data.config.session, &user).map_err(|e| {
        log::error!("session token error: {e}");
        ApiError::Internal
    })?;
    log::info!("registered user {}", user.username);
    Ok(HttpResponse::Created()
        .cookie(auth::session_cookie(&data.config.session, token))
        .json(SessionResponse { message: "User registered and logged in successfully".into(), username: user.username }))
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 400, description = "Missing username or password", body = ApiErrorBody),
        (status = 401, description = "Invalid username or password", body = ApiErrorBody)
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<Credentials>) -> Result<HttpResponse, ApiError> {
    let (username, password) = payload
        .into_inner()
        .checked()
        .ok_or_else(|| ApiError::BadRequest("Username and password are required".into()))?;
    let invalid = || ApiError::Unauthorized("Invalid username or password".into());
    let user = match data.repo.find_user_by_username(&username).await {
        Ok(user) => user,
        Err(RepoError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(e.into()),
    };
    if !auth::verify_password(&password, &user.password_hash) {
        return Err(invalid());
    }
    let token = auth::create_session_token(&data.config.session, &user).map_err(|e| {
        log::error!("session token error: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok()
        .cookie(auth::session_cookie(&data.config.session, token))
        .json(SessionResponse { message: "Logged in successfully".into(), username: user.username }))
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Session cleared", body = MessageResponse),
        (status = 401, description = "No active session", body = ApiErrorBody)
    )
)]
pub async fn logout(auth: Auth) -> Result<HttpResponse, ApiError> {
    log::info!("user {} logged out", auth.username());
    Ok(HttpResponse::Ok()
        .cookie(auth::removal_cookie())
        .json(message("Logged out successfully")))
}

#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Service and session status", body = StatusResponse))
)]
pub async fn status(auth: Option<Auth>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        message: "TrustLog Backend is running.".into(),
        authenticated: auth.is_some(),
        username: auth.map(|a| a.0.username),
    })
}

#[utoipa::path(
    get,
    path = "/config/allowed_extensions",
    responses((status = 200, description = "Accepted upload extensions", body = [String]))
)]
pub async fn allowed_extensions() -> HttpResponse {
    HttpResponse::Ok().json(ALLOWED_EXTENSIONS)
}

// ---------------- log records ----------------

#[utoipa::path(
    post,
    path = "/log_records",
    request_body(content = LogRecordForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Record and attachments created", body = CreatedResponse),
        (status = 400, description = "Missing field or disallowed file type", body = ApiErrorBody),
        (status = 401, description = "No active session", body = ApiErrorBody),
        (status = 413, description = "Payload too large", body = ApiErrorBody)
    )
)]
pub async fn create_log_record(
    _auth: Auth,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, data.config.max_upload_bytes).await?;
    let new = NewLogRecord::from_fields(&form.fields).map_err(ApiError::BadRequest)?;
    let id = data.repo.create_log_record(new, form.uploads, data.files.as_ref()).await?;
    Ok(HttpResponse::Created().json(CreatedResponse {
        message: "Log record and attachments created successfully".into(),
        id,
    }))
}

#[utoipa::path(
    get,
    path = "/log_records",
    params(LogRecordQuery),
    responses(
        (status = 200, description = "Matching records", body = [LogRecord]),
        (status = 400, description = "Invalid filter or sort parameter", body = ApiErrorBody),
        (status = 401, description = "No active session", body = ApiErrorBody)
    )
)]
pub async fn list_log_records(
    _auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<LogRecordQuery>,
) -> Result<HttpResponse, ApiError> {
    let filter = LogRecordFilter::try_from(query.into_inner()).map_err(ApiError::BadRequest)?;
    let records = data.repo.list_log_records(&filter).await?;
    Ok(HttpResponse::Ok().json(records))
}

#[utoipa::path(
    get,
    path = "/log_records/{id}",
    params(("id" = Id, Path, description = "Log record id")),
    responses(
        (status = 200, description = "Log record", body = LogRecord),
        (status = 404, description = "Log record not found", body = ApiErrorBody)
    )
)]
pub async fn get_log_record(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let record = data.repo.get_log_record(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    put,
    path = "/log_records/{id}",
    params(("id" = Id, Path, description = "Log record id")),
    request_body(content = LogRecordForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Record replaced, new attachments added", body = MessageResponse),
        (status = 400, description = "Missing field or disallowed file type", body = ApiErrorBody),
        (status = 404, description = "Log record not found", body = ApiErrorBody)
    )
)]
pub async fn update_log_record(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let form = read_form(payload, data.config.max_upload_bytes).await?;
    // unknown ids are reported before field validation
    data.repo.get_log_record(id).await?;
    let new = NewLogRecord::from_fields(&form.fields).map_err(ApiError::BadRequest)?;
    data.repo.replace_log_record(id, new, form.uploads, data.files.as_ref()).await?;
    Ok(HttpResponse::Ok().json(message(format!(
        "Log record {id} updated and new attachments added successfully"
    ))))
}

#[utoipa::path(
    delete,
    path = "/log_records/{id}",
    params(("id" = Id, Path, description = "Log record id")),
    responses(
        (status = 200, description = "Record and its attachments deleted", body = MessageResponse),
        (status = 404, description = "Log record not found", body = ApiErrorBody)
    )
)]
pub async fn delete_log_record(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.delete_log_record(id, data.files.as_ref()).await?;
    Ok(HttpResponse::Ok().json(message(format!(
        "Log record {id} and its attachments deleted successfully"
    ))))
}

// ---------------- attachments ----------------

#[utoipa::path(
    get,
    path = "/log_records/{id}/attachments",
    params(("id" = Id, Path, description = "Log record id")),
    responses((status = 200, description = "Attachment metadata", body = [Attachment]))
)]
pub async fn list_record_attachments(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let attachments = data.repo.list_attachments(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(attachments))
}

#[utoipa::path(
    post,
    path = "/log_records/{id}/attachments",
    params(("id" = Id, Path, description = "Log record id")),
    request_body(content = LogRecordForm, content_type = "multipart/form-data", description = "Only the `files` parts are read"),
    responses(
        (status = 201, description = "Attachments stored", body = [Attachment]),
        (status = 400, description = "No files or disallowed file type", body = ApiErrorBody),
        (status = 404, description = "Log record not found", body = ApiErrorBody)
    )
)]
pub async fn upload_attachments(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, data.config.max_upload_bytes).await?;
    if form.uploads.iter().all(|u| u.filename.is_empty()) {
        return Err(ApiError::BadRequest("No files provided".into()));
    }
    let created = data
        .repo
        .add_attachments(path.into_inner(), form.uploads, data.files.as_ref())
        .await?;
    Ok(HttpResponse::Created().json(created))
}

/// `attachment` disposition carrying the client's original name. Names that
/// are not plain printable ASCII get an RFC 5987 `filename*` plus a
/// sanitized fallback.
fn download_disposition(original: &str) -> ContentDisposition {
    let display = original.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(original);
    let parameters = if display.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        vec![DispositionParam::Filename(display.to_string())]
    } else {
        vec![
            DispositionParam::Filename(sanitize_filename(display)),
            DispositionParam::FilenameExt(ExtendedValue {
                charset: Charset::Ext("UTF-8".into()),
                language_tag: None,
                value: display.as_bytes().to_vec(),
            }),
        ]
    };
    ContentDisposition { disposition: DispositionType::Attachment, parameters }
}

#[utoipa::path(
    get,
    path = "/attachments/{stored_filename}",
    params(("stored_filename" = String, Path, description = "Server-generated stored name")),
    responses(
        (status = 200, description = "File content, named after the original upload"),
        (status = 404, description = "File not found", body = ApiErrorBody)
    )
)]
pub async fn download_attachment(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let stored_filename = path.into_inner();
    let attachment = data.repo.find_attachment_by_stored_name(&stored_filename).await?;
    let bytes = match data.files.load(&attachment.filepath).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound) => {
            log::warn!("attachment {} has a row but no file at {}", attachment.id, attachment.filepath);
            return Err(ApiError::NotFound("File not found".into()));
        }
        Err(e) => {
            log::error!("attachment load error: {e}");
            return Err(ApiError::Internal);
        }
    };
    let content_type: mime::Mime = attachment.filetype.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM);
    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header(download_disposition(&attachment.filename))
        .body(bytes))
}

#[utoipa::path(
    delete,
    path = "/attachments/{id}",
    params(("id" = Id, Path, description = "Attachment id")),
    responses(
        (status = 200, description = "Attachment deleted", body = MessageResponse),
        (status = 404, description = "Attachment not found", body = ApiErrorBody)
    )
)]
pub async fn delete_attachment(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let attachment = data.repo.delete_attachment(path.into_inner(), data.files.as_ref()).await?;
    Ok(HttpResponse::Ok().json(message(format!(
        "Attachment {} deleted successfully",
        attachment.stored_filename
    ))))
}
