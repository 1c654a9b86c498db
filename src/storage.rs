use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Upload extensions accepted for attachments (compared lower-case).
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "pdf", "doc", "docx", "txt"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not_found")]
    NotFound,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of a freshly written attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub stored_filename: String,
    /// `YYYY/MM/<stored_filename>`, relative to the upload root
    pub relative_path: String,
    /// measured on disk after the write
    pub size_bytes: i64,
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Write `bytes` under a fresh random name with the given extension.
    async fn save(&self, extension: &str, bytes: &[u8]) -> Result<StoredFile, StorageError>;
    async fn load(&self, relative_path: &str) -> Result<Vec<u8>, StorageError>;
    /// Remove the file, then any month/year directory left empty behind it.
    async fn delete(&self, relative_path: &str) -> Result<(), StorageError>;
}

/// Last path segment of a client-supplied name (either separator style).
fn base_name(filename: &str) -> &str {
    filename.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(filename)
}

/// Lower-cased extension of `filename` if it is on the allow-list.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = base_name(filename).rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Filesystem-safe rendition of a client filename: no directories, only
/// ASCII alphanumerics plus `.`, `-` and `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = base_name(filename)
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(|c: char| c == '.' || c == '_');
    if cleaned.is_empty() {
        "file".into()
    } else {
        cleaned.to_string()
    }
}

// ---------------- Filesystem implementation ----------------
pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the upload root if it does not exist yet.
    pub async fn ensure_root(&self) -> std::io::Result<()> {
        if tokio::fs::metadata(&self.root).await.is_err() {
            tokio::fs::create_dir_all(&self.root).await?;
            info!("Created upload folder: {}", self.root.display());
        }
        Ok(())
    }

    /// Map a stored relative path onto the upload root, refusing anything
    /// that could escape it.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(relative_path);
        let mut parts = rel.components().peekable();
        if parts.peek().is_none() || !parts.all(|c| matches!(c, Component::Normal(_))) {
            return Err(StorageError::InvalidPath(relative_path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Drop the month directory holding `file` if it is empty, then the year
    /// directory above it. Never touches the root. Failures are only logged.
    async fn prune_empty_parents(&self, file: &Path) {
        let mut dir = file.parent();
        for _ in 0..2 {
            let Some(d) = dir else { return };
            if d == self.root.as_path() || !d.starts_with(&self.root) {
                return;
            }
            match Self::is_empty_dir(d).await {
                Ok(true) => {
                    if let Err(e) = tokio::fs::remove_dir(d).await {
                        error!("Error removing directory {}: {e}", d.display());
                        return;
                    }
                    info!("Removed empty directory: {}", d.display());
                }
                Ok(false) => return,
                Err(e) => {
                    warn!("Could not inspect directory {}: {e}", d.display());
                    return;
                }
            }
            dir = d.parent();
        }
    }

    fn bucket(now: DateTime<Utc>) -> (String, String) {
        (now.format("%Y").to_string(), now.format("%m").to_string())
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn save(&self, extension: &str, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        let (year, month) = Self::bucket(Utc::now());
        let dir = self.root.join(&year).join(&month);
        tokio::fs::create_dir_all(&dir).await?;

        let stored_filename = format!("{}.{}", uuid::Uuid::new_v4(), extension);
        let full = dir.join(&stored_filename);
        if let Err(e) = tokio::fs::write(&full, bytes).await {
            error!("write failed path={} err={e}", full.display());
            let _ = tokio::fs::remove_file(&full).await;
            return Err(e.into());
        }
        let size_bytes = tokio::fs::metadata(&full).await?.len() as i64;

        Ok(StoredFile {
            relative_path: format!("{year}/{month}/{stored_filename}"),
            stored_filename,
            size_bytes,
        })
    }

    async fn load(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(relative_path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, relative_path: &str) -> Result<(), StorageError> {
        let full = self.resolve(relative_path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => info!("Deleted file: {}", full.display()),
            // already gone; still tidy the bucket
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File already missing: {}", full.display())
            }
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_parents(&full).await;
        Ok(())
    }
}
