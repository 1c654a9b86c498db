use crate::error::ApiErrorBody;
use crate::models::{Attachment, Credentials, LogRecord};
use crate::routes::{CreatedResponse, LogRecordForm, MessageResponse, SessionResponse, StatusResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::logout,
        crate::routes::status,
        crate::routes::allowed_extensions,
        crate::routes::list_log_records,
        crate::routes::create_log_record,
        crate::routes::get_log_record,
        crate::routes::update_log_record,
        crate::routes::delete_log_record,
        crate::routes::list_record_attachments,
        crate::routes::upload_attachments,
        crate::routes::download_attachment,
        crate::routes::delete_attachment,
    ),
    components(schemas(
        LogRecord, LogRecordForm, Attachment, Credentials, ApiErrorBody,
        MessageResponse, CreatedResponse, SessionResponse, StatusResponse
    )),
    info(title = "TrustLog API", description = "Incident log with file attachments")
)]
pub struct ApiDoc;
