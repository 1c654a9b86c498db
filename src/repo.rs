use async_trait::async_trait;

use crate::intake::Upload;
use crate::models::*;
use crate::storage::{AttachmentStore, StorageError};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict")]
    Conflict,
    /// Rejected input, message names the field or file.
    #[error("{0}")]
    Invalid(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("database: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
            other => RepoError::Database(other),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait LogRecordRepo: Send + Sync {
    async fn list_log_records(&self, filter: &LogRecordFilter) -> RepoResult<Vec<LogRecord>>;
    async fn get_log_record(&self, id: Id) -> RepoResult<LogRecord>;
    /// Insert the record and its uploads atomically, returning the new id.
    async fn create_log_record(
        &self,
        new: NewLogRecord,
        uploads: Vec<Upload>,
        files: &dyn AttachmentStore,
    ) -> RepoResult<Id>;
    /// Full replace of every mutable field plus any new uploads.
    async fn replace_log_record(
        &self,
        id: Id,
        new: NewLogRecord,
        uploads: Vec<Upload>,
        files: &dyn AttachmentStore,
    ) -> RepoResult<()>;
    /// Delete the record, its attachment rows and their files.
    async fn delete_log_record(&self, id: Id, files: &dyn AttachmentStore) -> RepoResult<()>;
}

#[async_trait]
pub trait AttachmentRepo: Send + Sync {
    async fn add_attachments(
        &self,
        log_record_id: Id,
        uploads: Vec<Upload>,
        files: &dyn AttachmentStore,
    ) -> RepoResult<Vec<Attachment>>;
    async fn list_attachments(&self, log_record_id: Id) -> RepoResult<Vec<Attachment>>;
    async fn find_attachment_by_stored_name(&self, stored_filename: &str) -> RepoResult<Attachment>;
    async fn delete_attachment(&self, id: Id, files: &dyn AttachmentStore) -> RepoResult<Attachment>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, username: &str, password_hash: &str) -> RepoResult<User>;
    async fn find_user_by_username(&self, username: &str) -> RepoResult<User>;
}

pub trait Repo: LogRecordRepo + AttachmentRepo + UserRepo {}

impl<T> Repo for T where T: LogRecordRepo + AttachmentRepo + UserRepo {}

// SQLite implementation
pub mod sqlite {
    use super::*;
    use crate::intake::{self, WrittenFiles};
    use chrono::Utc;
    use log::error;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
    use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
    use std::path::Path;

    const LOG_RECORD_SELECT: &str = r#"
        SELECT lr.id, lr.date_of_incident, lr.time_of_incident, lr.category,
               lr.description_of_incident, lr.impact_types, lr.impact_details,
               lr.supporting_evidence_snippet, lr.exhibit_reference, lr.created_at,
               COUNT(a.id) AS attachment_count
        FROM log_records lr
        LEFT JOIN attachments a ON a.log_record_id = lr.id
    "#;

    const ATTACHMENT_SELECT: &str = "SELECT id, log_record_id, filename, stored_filename, filepath, filetype, filesize_bytes, upload_date FROM attachments";

    #[derive(Clone)]
    pub struct SqliteRepo {
        pool: SqlitePool,
    }

    impl SqliteRepo {
        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }

        /// Open (or create) the database file in WAL mode and apply migrations.
        pub async fn connect(path: &Path, max_connections: u32) -> anyhow::Result<Self> {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Ok(Self::new(pool))
        }

        async fn ensure_log_record(conn: &mut SqliteConnection, id: Id) -> RepoResult<()> {
            sqlx::query_scalar::<_, i64>("SELECT id FROM log_records WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .map(|_| ())
                .ok_or(RepoError::NotFound("log record"))
        }

        async fn insert_record(
            conn: &mut SqliteConnection,
            written: &mut WrittenFiles<'_>,
            new: &NewLogRecord,
            uploads: Vec<Upload>,
        ) -> RepoResult<Id> {
            let id = sqlx::query(
                r#"INSERT INTO log_records (
                       date_of_incident, time_of_incident, category, description_of_incident,
                       impact_types, impact_details, supporting_evidence_snippet, exhibit_reference,
                       created_at
                   ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(new.date_of_incident)
            .bind(&new.time_of_incident)
            .bind(&new.category)
            .bind(&new.description_of_incident)
            .bind(new.impact_types_json())
            .bind(&new.impact_details)
            .bind(&new.supporting_evidence_snippet)
            .bind(&new.exhibit_reference)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
            intake::insert_uploads(conn, written, id, uploads).await?;
            Ok(id)
        }

        async fn update_record(
            conn: &mut SqliteConnection,
            written: &mut WrittenFiles<'_>,
            id: Id,
            new: &NewLogRecord,
            uploads: Vec<Upload>,
        ) -> RepoResult<()> {
            Self::ensure_log_record(conn, id).await?;
            sqlx::query(
                r#"UPDATE log_records SET
                       date_of_incident = ?,
                       time_of_incident = ?,
                       category = ?,
                       description_of_incident = ?,
                       impact_types = ?,
                       impact_details = ?,
                       supporting_evidence_snippet = ?,
                       exhibit_reference = ?
                   WHERE id = ?"#,
            )
            .bind(new.date_of_incident)
            .bind(&new.time_of_incident)
            .bind(&new.category)
            .bind(&new.description_of_incident)
            .bind(new.impact_types_json())
            .bind(&new.impact_details)
            .bind(&new.supporting_evidence_snippet)
            .bind(&new.exhibit_reference)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            intake::insert_uploads(conn, written, id, uploads).await?;
            Ok(())
        }

        async fn attach(
            conn: &mut SqliteConnection,
            written: &mut WrittenFiles<'_>,
            log_record_id: Id,
            uploads: Vec<Upload>,
        ) -> RepoResult<Vec<Attachment>> {
            Self::ensure_log_record(conn, log_record_id).await?;
            intake::insert_uploads(conn, written, log_record_id, uploads).await
        }

        /// Best-effort removal once the rows are gone for good.
        async fn remove_files(files: &dyn AttachmentStore, paths: &[String]) {
            for path in paths {
                if let Err(e) = files.delete(path).await {
                    error!("Error deleting attachment file {path}: {e}");
                }
            }
        }
    }

    #[async_trait]
    impl LogRecordRepo for SqliteRepo {
        async fn list_log_records(&self, filter: &LogRecordFilter) -> RepoResult<Vec<LogRecord>> {
            let mut qb = QueryBuilder::<Sqlite>::new(LOG_RECORD_SELECT);
            qb.push(" WHERE 1=1");
            if let Some(category) = &filter.category {
                qb.push(" AND lr.category = ").push_bind(category.clone());
            }
            if let Some(start) = filter.start_date {
                qb.push(" AND lr.date_of_incident >= ").push_bind(start);
            }
            if let Some(end) = filter.end_date {
                qb.push(" AND lr.date_of_incident <= ").push_bind(end);
            }
            // column and direction come from closed enums, never from the request
            qb.push(" GROUP BY lr.id ORDER BY ")
                .push(filter.sort_by.column())
                .push(" ")
                .push(filter.sort_order.keyword())
                .push(", lr.created_at DESC");

            let rows = qb
                .build_query_as::<LogRecordRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(LogRecord::from).collect())
        }

        async fn get_log_record(&self, id: Id) -> RepoResult<LogRecord> {
            let sql = format!("{LOG_RECORD_SELECT} WHERE lr.id = ? GROUP BY lr.id");
            sqlx::query_as::<_, LogRecordRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(LogRecord::from)
                .ok_or(RepoError::NotFound("log record"))
        }

        async fn create_log_record(
            &self,
            new: NewLogRecord,
            uploads: Vec<Upload>,
            files: &dyn AttachmentStore,
        ) -> RepoResult<Id> {
            let mut tx = self.pool.begin().await?;
            let mut written = WrittenFiles::new(files);
            let outcome = Self::insert_record(&mut tx, &mut written, &new, uploads).await;
            intake::finish(tx, written, outcome).await
        }

        async fn replace_log_record(
            &self,
            id: Id,
            new: NewLogRecord,
            uploads: Vec<Upload>,
            files: &dyn AttachmentStore,
        ) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            let mut written = WrittenFiles::new(files);
            let outcome = Self::update_record(&mut tx, &mut written, id, &new, uploads).await;
            intake::finish(tx, written, outcome).await
        }

        async fn delete_log_record(&self, id: Id, files: &dyn AttachmentStore) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            let paths: Vec<String> =
                sqlx::query_scalar("SELECT filepath FROM attachments WHERE log_record_id = ?")
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await?;
            sqlx::query("DELETE FROM attachments WHERE log_record_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM log_records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted == 0 {
                tx.rollback().await?;
                return Err(RepoError::NotFound("log record"));
            }
            tx.commit().await?;

            Self::remove_files(files, &paths).await;
            Ok(())
        }
    }

    #[async_trait]
    impl AttachmentRepo for SqliteRepo {
        async fn add_attachments(
            &self,
            log_record_id: Id,
            uploads: Vec<Upload>,
            files: &dyn AttachmentStore,
        ) -> RepoResult<Vec<Attachment>> {
            let mut tx = self.pool.begin().await?;
            let mut written = WrittenFiles::new(files);
            let outcome = Self::attach(&mut tx, &mut written, log_record_id, uploads).await;
            intake::finish(tx, written, outcome).await
        }

        async fn list_attachments(&self, log_record_id: Id) -> RepoResult<Vec<Attachment>> {
            let sql = format!("{ATTACHMENT_SELECT} WHERE log_record_id = ? ORDER BY id");
            let rows = sqlx::query_as::<_, Attachment>(&sql)
                .bind(log_record_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn find_attachment_by_stored_name(&self, stored_filename: &str) -> RepoResult<Attachment> {
            let sql = format!("{ATTACHMENT_SELECT} WHERE stored_filename = ?");
            sqlx::query_as::<_, Attachment>(&sql)
                .bind(stored_filename)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RepoError::NotFound("attachment"))
        }

        async fn delete_attachment(&self, id: Id, files: &dyn AttachmentStore) -> RepoResult<Attachment> {
            let sql = format!("{ATTACHMENT_SELECT} WHERE id = ?");
            let attachment = sqlx::query_as::<_, Attachment>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RepoError::NotFound("attachment"))?;
            let deleted = sqlx::query("DELETE FROM attachments WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();
            if deleted == 0 {
                // removed by a concurrent request in between
                return Err(RepoError::NotFound("attachment"));
            }
            Self::remove_files(files, std::slice::from_ref(&attachment.filepath)).await;
            Ok(attachment)
        }
    }

    #[async_trait]
    impl UserRepo for SqliteRepo {
        async fn create_user(&self, username: &str, password_hash: &str) -> RepoResult<User> {
            let id = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
                .bind(username)
                .bind(password_hash)
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
            Ok(User { id, username: username.to_string(), password_hash: password_hash.to_string() })
        }

        async fn find_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, password_hash FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RepoError::NotFound("user"))
        }
    }
}
