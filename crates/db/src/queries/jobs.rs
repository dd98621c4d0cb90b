//! Job record persistence.

use crate::{Database, DbResult};

/// A job record as stored. Status and kind are the wire strings; `payload`,
/// `result` are JSON text; timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub target_project_id: Option<String>,
    pub payload: String,
    pub progress_current: i64,
    pub progress_total: i64,
    pub progress_message: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

type JobTuple = (
    String,
    String,
    String,
    Option<String>,
    String,
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

const JOB_COLUMNS: &str = "id, kind, status, target_project_id, payload, progress_current, \
     progress_total, progress_message, result, error, created_at, updated_at";

impl From<JobTuple> for JobRow {
    fn from(t: JobTuple) -> Self {
        Self {
            id: t.0,
            kind: t.1,
            status: t.2,
            target_project_id: t.3,
            payload: t.4,
            progress_current: t.5,
            progress_total: t.6,
            progress_message: t.7,
            result: t.8,
            error: t.9,
            created_at: t.10,
            updated_at: t.11,
        }
    }
}

impl Database {
    /// Insert a job record or overwrite the stored copy.
    pub async fn upsert_job(&self, job: &JobRow) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO jobs (id, kind, status, target_project_id, payload,
                   progress_current, progress_total, progress_message, result, error,
                   created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   progress_current = excluded.progress_current,
                   progress_total = excluded.progress_total,
                   progress_message = excluded.progress_message,
                   result = excluded.result,
                   error = excluded.error,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.status)
        .bind(&job.target_project_id)
        .bind(&job.payload)
        .bind(job.progress_current)
        .bind(job.progress_total)
        .bind(&job.progress_message)
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> DbResult<Option<JobRow>> {
        let row: Option<JobTuple> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(JobRow::from))
    }

    /// All stored jobs, oldest first.
    pub async fn list_jobs(&self) -> DbResult<Vec<JobRow>> {
        let rows: Vec<JobTuple> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id"))
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(JobRow::from).collect())
    }

    pub async fn delete_job(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(id: &str, created_at: i64) -> JobRow {
        JobRow {
            id: id.into(),
            kind: "generate_answers".into(),
            status: "pending".into(),
            target_project_id: Some("p1".into()),
            payload: "{}".into(),
            progress_current: 0,
            progress_total: 0,
            progress_message: None,
            result: None,
            error: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_job() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db.get_job("j1").await.unwrap().is_none());

        let mut job = row("j1", 100);
        db.upsert_job(&job).await.unwrap();
        assert_eq!(db.get_job("j1").await.unwrap(), Some(job.clone()));

        job.status = "completed".into();
        job.progress_current = 2;
        job.progress_total = 2;
        job.result = Some(r#"{"answers":[]}"#.into());
        job.updated_at = 200;
        db.upsert_job(&job).await.unwrap();
        assert_eq!(db.get_job("j1").await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_upsert_keeps_immutable_columns() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_job(&row("j1", 100)).await.unwrap();

        let mut changed = row("j1", 999);
        changed.kind = "index_all".into();
        db.upsert_job(&changed).await.unwrap();

        let stored = db.get_job("j1").await.unwrap().unwrap();
        assert_eq!(stored.kind, "generate_answers");
        assert_eq!(stored.created_at, 100);
        assert_eq!(stored.updated_at, 999);
    }

    #[tokio::test]
    async fn test_list_and_delete_jobs() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_job(&row("b", 200)).await.unwrap();
        db.upsert_job(&row("a", 100)).await.unwrap();

        let ids: Vec<String> = db.list_jobs().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        assert!(db.delete_job("a").await.unwrap());
        assert!(!db.delete_job("a").await.unwrap());
        assert_eq!(db.list_jobs().await.unwrap().len(), 1);
    }
}
