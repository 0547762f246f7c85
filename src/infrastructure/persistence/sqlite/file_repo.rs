//! SQLite Batch Input File Repository

use async_trait::async_trait;
use sqlx::FromRow;
use std::path::PathBuf;
use uuid::Uuid;

use super::{db_err, save_err, parse_opt_time, parse_time, parse_uuid, DbPool};
use crate::application::ports::{FileRepositoryPort, RepositoryError};
use crate::domain::batch::{BatchInputFile, RemoteFileStatus};

const FILE_COLUMNS: &str = "id, project_id, display_name, local_path, size_bytes, imported_at, \
     remote_name, remote_uri, remote_status, remote_created_at, remote_expires_at, result_path";

/// SQLite Input File Repository
pub struct SqliteFileRepository {
    pool: DbPool,
}

impl SqliteFileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct FileRow {
    id: String,
    project_id: String,
    display_name: String,
    local_path: String,
    size_bytes: i64,
    imported_at: String,
    remote_name: Option<String>,
    remote_uri: Option<String>,
    remote_status: Option<String>,
    remote_created_at: Option<String>,
    remote_expires_at: Option<String>,
    result_path: Option<String>,
}

impl TryFrom<FileRow> for BatchInputFile {
    type Error = RepositoryError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let remote_status = row
            .remote_status
            .as_deref()
            .map(|s| {
                RemoteFileStatus::from_str(s).ok_or_else(|| {
                    RepositoryError::SerializationError(format!("unknown file status: {}", s))
                })
            })
            .transpose()?;

        Ok(BatchInputFile {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            display_name: row.display_name,
            local_path: PathBuf::from(row.local_path),
            size_bytes: row.size_bytes.max(0) as u64,
            imported_at: parse_time(&row.imported_at)?,
            remote_name: row.remote_name,
            remote_uri: row.remote_uri,
            remote_status,
            remote_created_at: parse_opt_time(row.remote_created_at)?,
            remote_expires_at: parse_opt_time(row.remote_expires_at)?,
            result_path: row.result_path.map(PathBuf::from),
        })
    }
}

#[async_trait]
impl FileRepositoryPort for SqliteFileRepository {
    async fn save(&self, file: &BatchInputFile) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO batch_files (
                id, project_id, display_name, local_path, size_bytes, imported_at,
                remote_name, remote_uri, remote_status, remote_created_at, remote_expires_at, result_path
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(file.project_id.to_string())
        .bind(&file.display_name)
        .bind(file.local_path.to_string_lossy().to_string())
        .bind(file.size_bytes as i64)
        .bind(file.imported_at.to_rfc3339())
        .bind(&file.remote_name)
        .bind(&file.remote_uri)
        .bind(file.remote_status.map(|s| s.as_str()))
        .bind(file.remote_created_at.map(|t| t.to_rfc3339()))
        .bind(file.remote_expires_at.map(|t| t.to_rfc3339()))
        .bind(file.result_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BatchInputFile>, RepositoryError> {
        let row: Option<FileRow> =
            sqlx::query_as(&format!("SELECT {} FROM batch_files WHERE id = ?", FILE_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(BatchInputFile::try_from).transpose()
    }

    async fn find_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<BatchInputFile>, RepositoryError> {
        let rows: Vec<FileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_files WHERE project_id = ? ORDER BY imported_at ASC",
            FILE_COLUMNS
        ))
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(BatchInputFile::try_from).collect()
    }

    async fn update(&self, file: &BatchInputFile) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE batch_files SET
                display_name = ?,
                local_path = ?,
                size_bytes = ?,
                remote_name = ?,
                remote_uri = ?,
                remote_status = ?,
                remote_created_at = ?,
                remote_expires_at = ?,
                result_path = ?
            WHERE id = ?
            "#,
        )
        .bind(&file.display_name)
        .bind(file.local_path.to_string_lossy().to_string())
        .bind(file.size_bytes as i64)
        .bind(&file.remote_name)
        .bind(&file.remote_uri)
        .bind(file.remote_status.map(|s| s.as_str()))
        .bind(file.remote_created_at.map(|t| t.to_rfc3339()))
        .bind(file.remote_expires_at.map(|t| t.to_rfc3339()))
        .bind(file.result_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(file.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("batch file {}", file.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "DELETE FROM job_messages WHERE job_id IN (SELECT id FROM batch_jobs WHERE file_id = ?)",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(save_err)?;

        sqlx::query("DELETE FROM batch_jobs WHERE file_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;

        let result = sqlx::query("DELETE FROM batch_files WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("batch file {}", id)));
        }

        tx.commit().await.map_err(save_err)?;

        Ok(())
    }
}
