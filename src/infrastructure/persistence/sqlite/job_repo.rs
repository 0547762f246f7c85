//! SQLite Batch Job Store
//!
//! 任务行与消息行分表存放；`update` 在单个事务内完成读-改-写，
//! 只追加新消息。

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use super::{db_err, save_err, parse_opt_time, parse_time, parse_uuid, DbPool};
use crate::application::ports::{JobMutator, JobStorePort, RepositoryError};
use crate::domain::batch::{BatchJob, BatchJobStatus, MessageSeverity, StatusMessage, TokenUsage};

const JOB_COLUMNS: &str = "id, file_id, remote_name, display_name, status, started_at, \
     result_file_name, total_tokens, thoughts_tokens, prompt_tokens, candidates_tokens, \
     created_at, updated_at";

/// SQLite Job Store
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    file_id: String,
    remote_name: Option<String>,
    display_name: String,
    status: String,
    started_at: Option<String>,
    result_file_name: Option<String>,
    total_tokens: Option<i64>,
    thoughts_tokens: Option<i64>,
    prompt_tokens: Option<i64>,
    candidates_tokens: Option<i64>,
    created_at: String,
    updated_at: String,
}

#[derive(FromRow)]
struct MessageRow {
    text: String,
    severity: String,
    created_at: String,
}

impl TryFrom<MessageRow> for StatusMessage {
    type Error = RepositoryError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(StatusMessage {
            severity: MessageSeverity::from_str(&row.severity).ok_or_else(|| {
                RepositoryError::SerializationError(format!("unknown severity: {}", row.severity))
            })?,
            text: row.text,
            created_at: parse_time(&row.created_at)?,
        })
    }
}

fn into_job(row: JobRow, messages: Vec<MessageRow>) -> Result<BatchJob, RepositoryError> {
    let status = BatchJobStatus::from_str(&row.status).ok_or_else(|| {
        RepositoryError::SerializationError(format!("unknown job status: {}", row.status))
    })?;

    Ok(BatchJob {
        id: parse_uuid(&row.id)?,
        file_id: parse_uuid(&row.file_id)?,
        remote_name: row.remote_name,
        display_name: row.display_name,
        status,
        started_at: parse_opt_time(row.started_at)?,
        result_file_name: row.result_file_name,
        token_usage: TokenUsage {
            total: row.total_tokens,
            thoughts: row.thoughts_tokens,
            prompt: row.prompt_tokens,
            candidates: row.candidates_tokens,
        },
        messages: messages
            .into_iter()
            .map(StatusMessage::try_from)
            .collect::<Result<_, _>>()?,
        created_at: parse_time(&row.created_at)?,
        updated_at: parse_time(&row.updated_at)?,
    })
}

async fn load_messages<'e, E>(executor: E, job_id: &str) -> Result<Vec<MessageRow>, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT text, severity, created_at FROM job_messages WHERE job_id = ? ORDER BY seq ASC")
        .bind(job_id)
        .fetch_all(executor)
        .await
        .map_err(db_err)
}

async fn insert_job(tx: &mut Transaction<'_, Sqlite>, job: &BatchJob) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO batch_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        JOB_COLUMNS
    ))
    .bind(job.id.to_string())
    .bind(job.file_id.to_string())
    .bind(&job.remote_name)
    .bind(&job.display_name)
    .bind(job.status.as_str())
    .bind(job.started_at.map(|t| t.to_rfc3339()))
    .bind(&job.result_file_name)
    .bind(job.token_usage.total)
    .bind(job.token_usage.thoughts)
    .bind(job.token_usage.prompt)
    .bind(job.token_usage.candidates)
    .bind(job.created_at.to_rfc3339())
    .bind(job.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

    insert_messages(tx, job, 0).await
}

/// 写入 `job.messages[from..]`
async fn insert_messages(
    tx: &mut Transaction<'_, Sqlite>,
    job: &BatchJob,
    from: usize,
) -> Result<(), RepositoryError> {
    for (seq, message) in job.messages.iter().enumerate().skip(from) {
        sqlx::query(
            "INSERT INTO job_messages (job_id, seq, text, severity, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(seq as i64)
        .bind(&message.text)
        .bind(message.severity.as_str())
        .bind(message.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;
    }
    Ok(())
}

impl SqliteJobStore {
    async fn fetch_one(&self, sql: &str, key: String) -> Result<Option<BatchJob>, RepositoryError> {
        let row: Option<JobRow> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let messages = load_messages(&self.pool, &row.id).await?;
                into_job(row, messages).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobStorePort for SqliteJobStore {
    async fn insert(&self, job: &BatchJob) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        insert_job(&mut tx, job).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BatchJob>, RepositoryError> {
        self.fetch_one(
            &format!("SELECT {} FROM batch_jobs WHERE id = ?", JOB_COLUMNS),
            id.to_string(),
        )
        .await
    }

    async fn find_by_file(&self, file_id: Uuid) -> Result<Option<BatchJob>, RepositoryError> {
        self.fetch_one(
            &format!("SELECT {} FROM batch_jobs WHERE file_id = ?", JOB_COLUMNS),
            file_id.to_string(),
        )
        .await
    }

    async fn update(&self, id: Uuid, mutator: JobMutator) -> Result<BatchJob, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM batch_jobs WHERE id = ?", JOB_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        let row = row.ok_or_else(|| RepositoryError::NotFound(format!("batch job {}", id)))?;
        let messages = load_messages(&mut *tx, &row.id).await?;
        let mut job = into_job(row, messages)?;
        let persisted_messages = job.messages.len();

        // mutator 失败时事务随 tx drop 回滚
        mutator(&mut job)?;

        sqlx::query(
            r#"
            UPDATE batch_jobs SET
                remote_name = ?,
                display_name = ?,
                status = ?,
                started_at = ?,
                result_file_name = ?,
                total_tokens = ?,
                thoughts_tokens = ?,
                prompt_tokens = ?,
                candidates_tokens = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.remote_name)
        .bind(&job.display_name)
        .bind(job.status.as_str())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(&job.result_file_name)
        .bind(job.token_usage.total)
        .bind(job.token_usage.thoughts)
        .bind(job.token_usage.prompt)
        .bind(job.token_usage.candidates)
        .bind(job.updated_at.to_rfc3339())
        .bind(job.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        insert_messages(&mut tx, &job, persisted_messages).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::SaveFailed(e.to_string()))?;

        Ok(job)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM job_messages WHERE job_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;

        let result = sqlx::query("DELETE FROM batch_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("batch job {}", id)));
        }

        tx.commit().await.map_err(save_err)?;
        Ok(())
    }

    async fn replace_for_file(&self, fresh: &BatchJob) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "DELETE FROM job_messages WHERE job_id IN (SELECT id FROM batch_jobs WHERE file_id = ?)",
        )
        .bind(fresh.file_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(save_err)?;

        sqlx::query("DELETE FROM batch_jobs WHERE file_id = ?")
            .bind(fresh.file_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;

        insert_job(&mut tx, fresh).await?;

        tx.commit().await.map_err(save_err)?;
        Ok(())
    }

    async fn find_active(&self) -> Result<Vec<BatchJob>, RepositoryError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE status IN (?, ?) ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .bind(BatchJobStatus::Pending.as_str())
        .bind(BatchJobStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let messages = load_messages(&self.pool, &row.id).await?;
            jobs.push(into_job(row, messages)?);
        }
        Ok(jobs)
    }
}
