//! SQLite Project Repository

use async_trait::async_trait;
use sqlx::FromRow;
use uuid::Uuid;

use super::{db_err, save_err, parse_time, parse_uuid, DbPool};
use crate::application::ports::{ProjectRepositoryPort, RepositoryError};
use crate::domain::project::{Project, ProjectName};

/// SQLite Project Repository
pub struct SqliteProjectRepository {
    pool: DbPool,
}

impl SqliteProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    model: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = RepositoryError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: parse_uuid(&row.id)?,
            name: ProjectName::new(row.name)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?,
            model: row.model,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl ProjectRepositoryPort for SqliteProjectRepository {
    async fn save(&self, project: &Project) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, model, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(project.id.to_string())
        .bind(project.name.as_str())
        .bind(&project.model)
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, RepositoryError> {
        let row: Option<ProjectRow> = sqlx::query_as(
            "SELECT id, name, model, created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Project::try_from).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Project>, RepositoryError> {
        let rows: Vec<ProjectRow> = sqlx::query_as(
            "SELECT id, name, model, created_at, updated_at FROM projects ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Project::try_from).collect()
    }

    async fn update(&self, project: &Project) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE projects SET name = ?, model = ?, updated_at = ? WHERE id = ?")
            .bind(project.name.as_str())
            .bind(&project.model)
            .bind(project.updated_at.to_rfc3339())
            .bind(project.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("project {}", project.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        // 使用事务确保原子性
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            DELETE FROM job_messages WHERE job_id IN (
                SELECT j.id FROM batch_jobs j
                JOIN batch_files f ON f.id = j.file_id
                WHERE f.project_id = ?
            )
            "#,
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(save_err)?;

        sqlx::query(
            "DELETE FROM batch_jobs WHERE file_id IN (SELECT id FROM batch_files WHERE project_id = ?)",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(save_err)?;

        sqlx::query("DELETE FROM batch_files WHERE project_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("project {}", id)));
        }

        tx.commit().await.map_err(save_err)?;

        Ok(())
    }
}
