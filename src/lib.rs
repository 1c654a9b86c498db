pub mod auth;
pub mod config;
pub mod error;
pub mod intake;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod storage;

// Re-export commonly used items for tests / main
pub use config::AppConfig;
pub use routes::{config as configure, AppState};
