use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};

pub const MIN_SECRET_LEN: usize = 32;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024; // 16 MB

/// Process-wide settings, read once in `main` and handed to every component
/// through `AppState`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_db_connections: u32,
    /// Extra CORS origin for the browser client
    pub frontend_url: Option<String>,
    pub session: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_hours: i64,
    /// mark the session cookie `Secure` (HTTPS deployments)
    pub secure_cookie: bool,
}

impl SessionConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into(), ttl_hours: 24, secure_cookie: false }
    }
}

impl AppConfig {
    /// Defaults for everything except the paths and the session secret.
    pub fn new(database_path: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_path: database_path.into(),
            upload_dir: upload_dir.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_db_connections: 5,
            frontend_url: None,
            session: SessionConfig::new(secret),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let secret = env::var("SESSION_SECRET").context("SESSION_SECRET must be set")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!("SESSION_SECRET must be at least {MIN_SECRET_LEN} characters long");
        }

        let mut cfg = Self::new(
            env::var("DATABASE_PATH").unwrap_or_else(|_| "trustlog.db".into()),
            env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
            secret,
        );
        if let Ok(addr) = env::var("BIND_ADDR") {
            cfg.bind_addr = addr;
        }
        cfg.max_upload_bytes = parsed("MAX_UPLOAD_BYTES", cfg.max_upload_bytes)?;
        cfg.max_db_connections = parsed("DB_MAX_CONNECTIONS", cfg.max_db_connections)?;
        cfg.session.ttl_hours = parsed("SESSION_TTL_HOURS", cfg.session.ttl_hours)?;
        cfg.session.secure_cookie = env::var("COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        cfg.frontend_url = env::var("FRONTEND_URL").ok().filter(|v| !v.is_empty());
        Ok(cfg)
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}
