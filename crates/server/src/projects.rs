// crates/server/src/projects.rs
//! Project store: the authoritative in-memory project aggregates, written
//! through to SQLite after every change.

use std::collections::HashMap;

use diligence_core::{
    EvaluationError, Project, ProjectEvent, ProjectStatus, ReviewError, TransitionError,
};
use diligence_db::{Database, DbError};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Answer not found: {0}")]
    AnswerNotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Database(#[from] DbError),
}

pub struct ProjectStore {
    db: Database,
    projects: RwLock<HashMap<String, Project>>,
}

impl ProjectStore {
    /// Load every stored project.
    pub async fn load(db: Database) -> Result<Self, DbError> {
        let projects = db
            .load_projects()
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Ok(Self {
            db,
            projects: RwLock::new(projects),
        })
    }

    pub async fn insert(&self, project: Project) -> Result<(), DbError> {
        let mut projects = self.projects.write().await;
        self.db.upsert_project(&project).await?;
        info!(project_id = %project.id, questions = project.questions.len(), "project created");
        projects.insert(project.id.clone(), project);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Project> {
        self.projects.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.projects.read().await.contains_key(id)
    }

    /// All projects, oldest first.
    pub async fn list(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.read().await.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        projects
    }

    /// Apply `f` to a copy of the project, persist the copy, then make it
    /// current. On any error the stored project is unchanged.
    pub async fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Project) -> Result<T, ProjectError>,
    ) -> Result<T, ProjectError> {
        let mut projects = self.projects.write().await;
        let current = projects
            .get(id)
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))?;

        let mut next = current.clone();
        let out = f(&mut next)?;
        next.touch();
        self.db.upsert_project(&next).await?;
        projects.insert(id.to_string(), next);
        Ok(out)
    }

    /// Move a project's status through the lifecycle.
    pub async fn transition(
        &self,
        id: &str,
        event: ProjectEvent,
    ) -> Result<ProjectStatus, ProjectError> {
        self.update(id, |project| apply_event(project, event)).await
    }

    /// Revert projects whose generation was cut off by a restart. Returns the
    /// number reverted.
    pub async fn recover_interrupted(&self) -> Result<usize, ProjectError> {
        let stuck: Vec<String> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.status == ProjectStatus::Processing)
            .map(|p| p.id.clone())
            .collect();

        for id in &stuck {
            let status = self.transition(id, ProjectEvent::GenerationFailed).await?;
            warn!(project_id = %id, %status, "reverted project interrupted mid-generation");
        }
        Ok(stuck.len())
    }
}

/// Apply a lifecycle event to a project in place.
pub fn apply_event(project: &mut Project, event: ProjectEvent) -> Result<ProjectStatus, ProjectError> {
    let from = project.status;
    let to = from.apply(event)?;
    project.status = to;
    if from != to {
        info!(project_id = %project.id, %from, %to, event = event.name(), "project status changed");
    }
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_core::{Question, Scope};

    fn project() -> Project {
        Project::new(
            "Fund IV",
            Scope::Specific,
            vec![Question {
                id: "q1".into(),
                text: "Who is the auditor?".into(),
                section: "Financial".into(),
                order: 1,
            }],
        )
    }

    #[tokio::test]
    async fn test_insert_and_reload() {
        let db = Database::new_in_memory().await.unwrap();
        let store = ProjectStore::load(db.clone()).await.unwrap();
        let p = project();
        store.insert(p.clone()).await.unwrap();

        let reloaded = ProjectStore::load(db).await.unwrap();
        assert_eq!(reloaded.get(&p.id).await.unwrap().name, "Fund IV");
    }

    #[tokio::test]
    async fn test_failed_update_leaves_project_unchanged() {
        let store = ProjectStore::load(Database::new_in_memory().await.unwrap())
            .await
            .unwrap();
        let p = project();
        store.insert(p.clone()).await.unwrap();

        let err = store
            .update(&p.id, |project| {
                project.name = "renamed".into();
                Err::<(), _>(ProjectError::AnswerNotFound("a1".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::AnswerNotFound(_)));
        assert_eq!(store.get(&p.id).await.unwrap().name, "Fund IV");
    }

    #[tokio::test]
    async fn test_transition_rejects_invalid_event() {
        let store = ProjectStore::load(Database::new_in_memory().await.unwrap())
            .await
            .unwrap();
        let p = project();
        store.insert(p.clone()).await.unwrap();

        let err = store
            .transition(&p.id, ProjectEvent::GenerationStarted)
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::Transition(_)));

        let status = store
            .transition(
                &p.id,
                ProjectEvent::IndexCompleted {
                    reindex: false,
                    had_answers: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(status, ProjectStatus::Indexed);
    }

    #[tokio::test]
    async fn test_recover_interrupted_reverts_processing() {
        let db = Database::new_in_memory().await.unwrap();
        let mut p = project();
        p.status = ProjectStatus::Processing;
        db.upsert_project(&p).await.unwrap();

        let store = ProjectStore::load(db).await.unwrap();
        assert_eq!(store.recover_interrupted().await.unwrap(), 1);
        assert_eq!(store.get(&p.id).await.unwrap().status, ProjectStatus::Indexed);
    }

    #[tokio::test]
    async fn test_update_unknown_project() {
        let store = ProjectStore::load(Database::new_in_memory().await.unwrap())
            .await
            .unwrap();
        let err = store.update("nope", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, ProjectError::NotFound(id) if id == "nope"));
    }
}
