use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use trustlog::openapi::ApiDoc;
use trustlog::repo::sqlite::SqliteRepo;
use trustlog::storage::FsAttachmentStore;
use trustlog::{configure, AppConfig, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("invalid configuration: {e:#}");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };

    info!("Bootstrapping TrustLog server");
    info!("Database: {}", cfg.database_path.display());
    info!("Upload folder: {}", cfg.upload_dir.display());

    let repo = SqliteRepo::connect(&cfg.database_path, cfg.max_db_connections).await?;
    let files = FsAttachmentStore::new(cfg.upload_dir.clone());
    files.ensure_root().await?;

    let state = AppState {
        repo: Arc::new(repo),
        files: Arc::new(files),
        config: cfg.clone(),
    };
    let openapi = ApiDoc::openapi();

    let app_cfg = cfg.clone();
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev servers for the browser client
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = app_cfg.frontend_url.as_deref() {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);

    server.run().await?;
    Ok(())
}
