//! Project aggregate persistence. The whole aggregate is one JSON document.

use diligence_core::Project;

use crate::{Database, DbError, DbResult};

impl Database {
    pub async fn upsert_project(&self, project: &Project) -> DbResult<()> {
        let data = serde_json::to_string(project)?;
        sqlx::query(
            r#"INSERT INTO projects (id, name, status, data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   status = excluded.status,
                   data = excluded.data,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(project.status.as_str())
        .bind(data)
        .bind(project.created_at.timestamp_millis())
        .bind(project.updated_at.timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: &str) -> DbResult<Option<Project>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, data FROM projects WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(decode_project).transpose()
    }

    /// All stored projects, oldest first.
    pub async fn load_projects(&self) -> DbResult<Vec<Project>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, data FROM projects ORDER BY created_at, id")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(decode_project).collect()
    }
}

fn decode_project((id, data): (String, String)) -> DbResult<Project> {
    serde_json::from_str(&data).map_err(|source| DbError::Corrupt { id, source })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use diligence_core::{Chunk, Document, ProjectStatus, Question, Scope};
    use pretty_assertions::assert_eq;

    use super::*;

    fn project() -> Project {
        let question = Question {
            id: "q1".into(),
            text: "Who is the auditor?".into(),
            section: "Financial".into(),
            order: 1,
        };
        let mut project = Project::new("Acme Fund III", Scope::Specific, vec![question]);
        project.add_document(Document {
            id: "d1".into(),
            filename: "f.pdf".into(),
            content: "The auditor is Deloitte.".into(),
            chunks: vec![Chunk {
                id: "d1:0".into(),
                index: 0,
                text: "The auditor is Deloitte.".into(),
            }],
            indexed_at: Utc::now(),
        });
        project
    }

    #[tokio::test]
    async fn test_project_round_trips_with_document_content() {
        let db = Database::new_in_memory().await.unwrap();
        let mut p = project();
        db.upsert_project(&p).await.unwrap();
        assert_eq!(db.get_project(&p.id).await.unwrap(), Some(p.clone()));

        p.status = ProjectStatus::Indexed;
        db.upsert_project(&p).await.unwrap();
        let loaded = db.load_projects().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, ProjectStatus::Indexed);
        assert_eq!(loaded[0].documents[0].content, "The auditor is Deloitte.");
    }

    #[tokio::test]
    async fn test_corrupt_project_reports_id() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO projects (id, name, status, data, created_at, updated_at) \
             VALUES ('bad', 'x', 'CREATED', 'not json', 0, 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        let err = db.load_projects().await.unwrap_err();
        assert!(matches!(err, DbError::Corrupt { ref id, .. } if id == "bad"));
    }
}
