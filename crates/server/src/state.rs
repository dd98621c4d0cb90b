// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use diligence_core::{AnswerGenerator, ExtractiveGenerator};
use diligence_db::{Database, DbError};
use diligence_search::{ChunkIndex, SearchError};
use thiserror::Error;
use tracing::info;

use crate::jobs::{JobRunner, JobSettings, JobStore, WorkContext};
use crate::projects::{ProjectError, ProjectStore};

/// Failure while bringing the service up from its stored state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Search index error: {0}")]
    Search(#[from] SearchError),

    #[error("Project recovery failed: {0}")]
    Project(#[from] ProjectError),
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub db: Database,
    pub jobs: Arc<JobStore>,
    pub projects: Arc<ProjectStore>,
    pub runner: Arc<JobRunner>,
    pub index: Arc<ChunkIndex>,
}

impl AppState {
    /// State with default job settings and the extractive generator.
    pub async fn new(db: Database) -> Result<Arc<Self>, StartupError> {
        Self::with_options(db, JobSettings::default(), Arc::new(ExtractiveGenerator::new())).await
    }

    /// Restore jobs and projects from the database and rebuild the search
    /// index from stored documents.
    ///
    /// Jobs left pending or in progress by a previous process are marked
    /// failed, and projects stuck in PROCESSING are returned to INDEXED.
    pub async fn with_options(
        db: Database,
        settings: JobSettings,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Arc<Self>, StartupError> {
        let jobs = Arc::new(JobStore::new(db.clone()));
        let restored = jobs.restore().await?;

        let projects = Arc::new(ProjectStore::load(db.clone()).await?);
        let reverted = projects.recover_interrupted().await?;

        let index = Arc::new(ChunkIndex::open_in_ram()?);
        let mut documents = 0usize;
        for project in projects.list().await {
            for document in &project.documents {
                index.index_document(&project.id, document)?;
                documents += 1;
            }
        }
        index.commit()?;

        info!(
            jobs = restored,
            reverted_projects = reverted,
            documents,
            chunks = index.num_chunks(),
            "state restored"
        );

        let ctx = Arc::new(WorkContext {
            projects: Arc::clone(&projects),
            index: Arc::clone(&index),
            generator,
            settings,
        });
        let runner = Arc::new(JobRunner::new(Arc::clone(&jobs), ctx));

        Ok(Arc::new(Self {
            start_time: Instant::now(),
            db,
            jobs,
            projects,
            runner,
            index,
        }))
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_core::{Document, Project, Scope};
    use std::time::Duration;

    /// Helper to create an AppState with an in-memory database for testing.
    async fn test_state() -> Arc<AppState> {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        AppState::new(db).await.expect("state")
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = test_state().await;
        assert!(state.uptime_secs() < 1);
        assert!(state.jobs.is_empty());
        assert!(state.projects.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_app_state_uptime() {
        let state = test_state().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Should be at least 0 seconds (could be 0 due to timing)
        let uptime = state.uptime_secs();
        assert!(uptime < 5); // Reasonable upper bound
    }

    #[tokio::test]
    async fn test_index_rebuilt_from_stored_documents() {
        let db = Database::new_in_memory().await.unwrap();

        let mut project = Project::new("Fund", Scope::Specific, Vec::new());
        let content = "The fund administrator is Apex Group.".to_string();
        let chunks = diligence_core::chunk_document("d1", &content, Default::default());
        project.add_document(Document {
            id: "d1".into(),
            filename: "admin.txt".into(),
            content,
            chunks,
            indexed_at: chrono::Utc::now(),
        });
        let project_id = project.id.clone();
        db.upsert_project(&project).await.unwrap();

        let state = AppState::new(db).await.unwrap();
        let hits = state.index.search("administrator", Some(&project_id), 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "admin.txt");
    }
}
