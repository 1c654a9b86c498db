//! Record + attachment writes as one unit.
//!
//! Files land on disk before the surrounding transaction commits, so every
//! path written during a request is remembered in a [`WrittenFiles`] list.
//! [`finish`] either commits, or rolls back and deletes those files again.

use chrono::Utc;
use log::{debug, error, warn};
use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::models::{Attachment, Id};
use crate::repo::{RepoError, RepoResult};
use crate::storage::{allowed_extension, sanitize_filename, AttachmentStore};

/// One file part of a multipart request, fully buffered.
#[derive(Debug, Clone)]
pub struct Upload {
    /// name supplied by the client, kept for downloads
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Files physically written by the current request.
pub struct WrittenFiles<'a> {
    store: &'a dyn AttachmentStore,
    paths: Vec<String>,
}

impl<'a> WrittenFiles<'a> {
    pub fn new(store: &'a dyn AttachmentStore) -> Self {
        Self { store, paths: Vec::new() }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Remove everything written so far. Failures are logged only.
    pub async fn discard(self) {
        for path in &self.paths {
            match self.store.delete(path).await {
                Ok(()) => debug!("rolled back file {path}"),
                Err(e) => error!("could not remove {path} during rollback: {e}"),
            }
        }
    }
}

/// Validate, write and register each upload against `log_record_id`.
///
/// Parts without a filename are skipped. The first disallowed extension
/// aborts with [`RepoError::Invalid`]; files already written stay in
/// `written` for the caller to discard.
pub async fn insert_uploads(
    conn: &mut SqliteConnection,
    written: &mut WrittenFiles<'_>,
    log_record_id: Id,
    uploads: Vec<Upload>,
) -> RepoResult<Vec<Attachment>> {
    let mut created = Vec::with_capacity(uploads.len());
    for upload in uploads {
        if upload.filename.is_empty() {
            continue;
        }
        let extension = allowed_extension(&upload.filename).ok_or_else(|| {
            RepoError::Invalid(format!("File type not allowed for: {}", upload.filename))
        })?;

        let stored = written.store.save(&extension, &upload.bytes).await?;
        written.paths.push(stored.relative_path.clone());
        debug!(
            "stored upload {} as {} ({} bytes)",
            sanitize_filename(&upload.filename),
            stored.relative_path,
            stored.size_bytes
        );

        let upload_date = Utc::now();
        let id = sqlx::query(
            "INSERT INTO attachments (log_record_id, filename, stored_filename, filepath, filetype, filesize_bytes, upload_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log_record_id)
        .bind(&upload.filename)
        .bind(&stored.stored_filename)
        .bind(&stored.relative_path)
        .bind(&upload.content_type)
        .bind(stored.size_bytes)
        .bind(upload_date)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        created.push(Attachment {
            id,
            log_record_id,
            filename: upload.filename,
            stored_filename: stored.stored_filename,
            filepath: stored.relative_path,
            filetype: upload.content_type,
            filesize_bytes: stored.size_bytes,
            upload_date,
        });
    }
    Ok(created)
}

/// Commit on success. Otherwise roll back and delete this request's files.
/// A failed commit is treated like any other failure.
pub async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    written: WrittenFiles<'_>,
    outcome: RepoResult<T>,
) -> RepoResult<T> {
    match outcome {
        Ok(value) => match tx.commit().await {
            Ok(()) => Ok(value),
            Err(e) => {
                error!("commit failed, removing {} written file(s): {e}", written.paths().len());
                written.discard().await;
                Err(e.into())
            }
        },
        Err(e) => {
            match &e {
                RepoError::Invalid(_) | RepoError::NotFound(_) => warn!("request rejected: {e}"),
                _ => error!("record write failed: {e}"),
            }
            if let Err(rb) = tx.rollback().await {
                error!("rollback failed: {rb}");
            }
            written.discard().await;
            Err(e)
        }
    }
}
