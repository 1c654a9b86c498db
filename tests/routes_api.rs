use actix_web::cookie::Cookie;
use actix_web::{http::header, test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use trustlog::auth::SESSION_COOKIE;
use trustlog::repo::sqlite::SqliteRepo;
use trustlog::storage::FsAttachmentStore;
use trustlog::{configure, AppConfig, AppState};

const SECRET: &str = "test-secret-must-be-32-bytes-long!!";
const BOUNDARY: &str = "trustlog-test-boundary";

async fn test_state(tweak: impl FnOnce(&mut AppConfig)) -> (AppState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::new(dir.path().join("trustlog.db"), dir.path().join("uploads"), SECRET);
    tweak(&mut cfg);
    let repo = SqliteRepo::connect(&cfg.database_path, 1).await.unwrap();
    let files = FsAttachmentStore::new(cfg.upload_dir.clone());
    files.ensure_root().await.unwrap();
    let state = AppState { repo: Arc::new(repo), files: Arc::new(files), config: Arc::new(cfg) };
    (state, dir)
}

// Helper to build a multipart body from text fields and `files` parts
fn build_multipart(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    for (file_name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn record_fields(category: &str) -> Vec<(&'static str, String)> {
    vec![
        ("date_of_incident", "2025-01-10".to_string()),
        ("time_of_incident", "14:30".to_string()),
        ("category", category.to_string()),
        ("description_of_incident", "Manager withheld pay".to_string()),
        ("impact_types", r#"["financial"]"#.to_string()),
        ("impact_details", "null".to_string()),
    ]
}

fn multipart_request(
    req: test::TestRequest,
    fields: &[(&'static str, String)],
    files: &[(&str, &[u8])],
) -> test::TestRequest {
    let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let (content_type, body) = build_multipart(&borrowed, files);
    req.insert_header((header::CONTENT_TYPE, content_type)).set_payload(body)
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(configure),
        )
        .await
    };
}

/// Register `username` and return the session cookie set by the response.
macro_rules! session {
    ($app:expr, $username:expr) => {{
        let req = test::TestRequest::post()
            .uri("/register")
            .set_json(&json!({"username": $username, "password": "hunter22"}))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 201);
        let cookie: Cookie<'static> = resp
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .expect("session cookie")
            .into_owned();
        cookie
    }};
}

#[actix_web::test]
async fn register_login_status_logout() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/status").to_request()).await;
    assert_eq!(resp.status(), 200);
    let v = json_body(&test::read_body(resp).await);
    assert_eq!(v["authenticated"], false);
    assert!(v["username"].is_null());

    let cookie = session!(app, "alice");
    assert!(cookie.http_only().unwrap_or(false));

    // same username again
    let req = test::TestRequest::post()
        .uri("/register")
        .set_json(&json!({"username": "alice", "password": "x"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // surrounding whitespace does not make a second account
    let req = test::TestRequest::post()
        .uri("/register")
        .set_json(&json!({"username": " alice ", "password": "x"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    let req = test::TestRequest::post()
        .uri("/login")
        .set_json(&json!({"username": "alice ", "password": "hunter22"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(json_body(&test::read_body(resp).await)["username"], "alice");

    let req = test::TestRequest::post()
        .uri("/register")
        .set_json(&json!({"username": "", "password": "x"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/login")
        .set_json(&json!({"username": "alice", "password": "wrong"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let v = json_body(&test::read_body(resp).await);
    assert_eq!(v["error"], "Invalid username or password");

    let req = test::TestRequest::post()
        .uri("/login")
        .set_json(&json!({"username": "nobody", "password": "hunter22"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/login")
        .set_json(&json!({"username": "alice", "password": "hunter22"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.response().cookies().any(|c| c.name() == SESSION_COOKIE));
    let v = json_body(&test::read_body(resp).await);
    assert_eq!(v["username"], "alice");

    let req = test::TestRequest::get().uri("/status").cookie(cookie.clone()).to_request();
    let v = json_body(&test::read_body(test::call_service(&app, req).await).await);
    assert_eq!(v["authenticated"], true);
    assert_eq!(v["username"], "alice");

    let req = test::TestRequest::post().uri("/logout").cookie(cookie).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let cleared = resp.response().cookies().find(|c| c.name() == SESSION_COOKIE).unwrap();
    assert_eq!(cleared.value(), "");

    let req = test::TestRequest::post().uri("/logout").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn record_routes_require_session() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);

    for uri in ["/log_records", "/log_records/1", "/log_records/1/attachments"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), 401, "{uri}");
        let v = json_body(&test::read_body(resp).await);
        assert!(v["error"].is_string());
    }

    let req = multipart_request(test::TestRequest::post().uri("/log_records"), &record_fields("A"), &[]);
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/log_records")
        .cookie(Cookie::new(SESSION_COOKIE, "forged"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn bearer_header_is_accepted() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "bob");

    let req = test::TestRequest::get()
        .uri("/log_records")
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", cookie.value())))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn create_fetch_download_and_delete_attachment() {
    let (state, dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "carol");

    let req = multipart_request(
        test::TestRequest::post().uri("/log_records").cookie(cookie.clone()),
        &record_fields("Workplace"),
        &[("evidence.pdf", b"%PDF-1.4 test")],
    );
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 201);
    let id = json_body(&test::read_body(resp).await)["id"].as_i64().unwrap();

    let req = test::TestRequest::get().uri(&format!("/log_records/{id}")).cookie(cookie.clone()).to_request();
    let rec = json_body(&test::read_body(test::call_service(&app, req).await).await);
    assert_eq!(rec["category"], "Workplace");
    // returned exactly as the browser sent it
    assert_eq!(rec["time_of_incident"], "14:30");
    assert_eq!(rec["impact_types"], json!(["financial"]));
    assert!(rec["impact_details"].is_null());
    assert_eq!(rec["attachment_count"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/log_records/{id}/attachments"))
        .cookie(cookie.clone())
        .to_request();
    let list = json_body(&test::read_body(test::call_service(&app, req).await).await);
    let attachment = &list.as_array().unwrap()[0];
    assert_eq!(attachment["filename"], "evidence.pdf");
    assert_eq!(attachment["filetype"], "application/pdf");
    let stored = attachment["stored_filename"].as_str().unwrap().to_string();
    let attachment_id = attachment["id"].as_i64().unwrap();
    assert!(stored.ends_with(".pdf"));
    assert_ne!(stored, "evidence.pdf");

    // downloads work without a session
    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/attachments/{stored}")).to_request()).await;
    assert_eq!(resp.status(), 200);
    let disposition = resp.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("evidence.pdf"));
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/pdf");
    assert_eq!(test::read_body(resp).await.as_ref(), b"%PDF-1.4 test");

    let req = test::TestRequest::delete().uri(&format!("/attachments/{attachment_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::delete()
        .uri(&format!("/attachments/{attachment_id}"))
        .cookie(cookie.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/attachments/{stored}")).to_request()).await;
    assert_eq!(resp.status(), 404);
    assert!(!dir.path().join("uploads").read_dir().unwrap().any(|_| true));
}

#[actix_web::test]
async fn create_rejects_bad_input_without_side_effects() {
    let (state, dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "dave");

    let mut fields = record_fields("A");
    fields.retain(|(k, _)| *k != "category");
    let req = multipart_request(test::TestRequest::post().uri("/log_records").cookie(cookie.clone()), &fields, &[]);
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json_body(&test::read_body(resp).await)["error"], "Missing or empty required field: category");

    let req = multipart_request(
        test::TestRequest::post().uri("/log_records").cookie(cookie.clone()),
        &record_fields("A"),
        &[("fine.pdf", b"ok"), ("payload.exe", b"MZ")],
    );
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json_body(&test::read_body(resp).await)["error"], "File type not allowed for: payload.exe");

    let req = test::TestRequest::get().uri("/log_records").cookie(cookie).to_request();
    let list = json_body(&test::read_body(test::call_service(&app, req).await).await);
    assert!(list.as_array().unwrap().is_empty());
    assert!(!dir.path().join("uploads").read_dir().unwrap().any(|_| true));
}

#[actix_web::test]
async fn oversized_body_is_refused() {
    let (state, _dir) = test_state(|cfg| cfg.max_upload_bytes = 64).await;
    let app = app!(state);
    let cookie = session!(app, "erin");

    let big = vec![b'x'; 1024];
    let req = multipart_request(
        test::TestRequest::post().uri("/log_records").cookie(cookie),
        &record_fields("A"),
        &[("big.txt", &big)],
    );
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 413);
}

#[actix_web::test]
async fn list_filters_and_rejects_unknown_sort() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "frank");

    for category in ["A", "B", "A"] {
        let req = multipart_request(
            test::TestRequest::post().uri("/log_records").cookie(cookie.clone()),
            &record_fields(category),
            &[],
        );
        assert_eq!(test::call_service(&app, req.to_request()).await.status(), 201);
    }

    let req = test::TestRequest::get()
        .uri("/log_records?category=A&sort_by=created_at&sort_order=asc")
        .cookie(cookie.clone())
        .to_request();
    let list = json_body(&test::read_body(test::call_service(&app, req).await).await);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert!(list[0]["id"].as_i64().unwrap() < list[1]["id"].as_i64().unwrap());

    let req = test::TestRequest::get()
        .uri("/log_records?sort_by=description_of_incident")
        .cookie(cookie.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert!(json_body(&test::read_body(resp).await)["error"].as_str().unwrap().contains("sort_by"));

    let req = test::TestRequest::get().uri("/log_records?start_date=yesterday").cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn update_replaces_record_and_reports_missing_first() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "grace");

    // unknown id wins over invalid fields
    let req = multipart_request(test::TestRequest::put().uri("/log_records/777").cookie(cookie.clone()), &[], &[]);
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 404);

    let req = multipart_request(
        test::TestRequest::post().uri("/log_records").cookie(cookie.clone()),
        &record_fields("A"),
        &[("a.pdf", b"a")],
    );
    let id = json_body(&test::read_body(test::call_service(&app, req.to_request()).await).await)["id"]
        .as_i64()
        .unwrap();

    let req = multipart_request(test::TestRequest::put().uri(&format!("/log_records/{id}")).cookie(cookie.clone()), &[], &[]);
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 400);

    let mut fields = record_fields("B");
    fields.retain(|(k, _)| *k != "time_of_incident");
    let req = multipart_request(
        test::TestRequest::put().uri(&format!("/log_records/{id}")).cookie(cookie.clone()),
        &fields,
        &[("b.png", b"png")],
    );
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let req = test::TestRequest::get().uri(&format!("/log_records/{id}")).cookie(cookie.clone()).to_request();
    let rec = json_body(&test::read_body(test::call_service(&app, req).await).await);
    assert_eq!(rec["category"], "B");
    assert!(rec["time_of_incident"].is_null());
    assert_eq!(rec["attachment_count"], 2);

    let req = test::TestRequest::delete().uri(&format!("/log_records/{id}")).cookie(cookie.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get().uri(&format!("/log_records/{id}")).cookie(cookie.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::delete().uri(&format!("/log_records/{id}")).cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn upload_attachments_to_existing_record() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);
    let cookie = session!(app, "heidi");

    let req = multipart_request(test::TestRequest::post().uri("/log_records").cookie(cookie.clone()), &record_fields("A"), &[]);
    let id = json_body(&test::read_body(test::call_service(&app, req.to_request()).await).await)["id"]
        .as_i64()
        .unwrap();

    let req = multipart_request(
        test::TestRequest::post().uri(&format!("/log_records/{id}/attachments")).cookie(cookie.clone()),
        &[],
        &[("scan.jpeg", b"jpeg"), ("notes.txt", b"n")],
    );
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 201);
    assert_eq!(json_body(&test::read_body(resp).await).as_array().unwrap().len(), 2);

    let req = multipart_request(test::TestRequest::post().uri(&format!("/log_records/{id}/attachments")).cookie(cookie.clone()), &[], &[]);
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 400);

    let req = multipart_request(
        test::TestRequest::post().uri("/log_records/9999/attachments").cookie(cookie),
        &[],
        &[("scan.jpeg", b"jpeg")],
    );
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 404);
}

#[actix_web::test]
async fn allowed_extensions_are_public() {
    let (state, _dir) = test_state(|_| {}).await;
    let app = app!(state);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/config/allowed_extensions").to_request()).await;
    assert_eq!(resp.status(), 200);
    let v = json_body(&test::read_body(resp).await);
    let exts: Vec<&str> = v.as_array().unwrap().iter().map(|e| e.as_str().unwrap()).collect();
    assert!(exts.contains(&"pdf"));
    assert!(exts.contains(&"docx"));
    assert!(!exts.contains(&"exe"));
}
