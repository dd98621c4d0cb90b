// crates/server/src/jobs/store.rs
//! Job record store: in-memory map of live job states, written through to
//! SQLite.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use diligence_db::{Database, DbResult};
use tracing::{info, warn};

use super::state::JobState;
use super::types::{JobRecord, JobStatus, JobView};

/// Error recorded on jobs that were running when the server stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted by server restart";

pub struct JobStore {
    db: Database,
    jobs: RwLock<HashMap<String, Arc<JobState>>>,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobState>>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            tracing::error!("job map lock poisoned on read");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobState>>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            tracing::error!("job map lock poisoned on write");
            poisoned.into_inner()
        })
    }

    /// Persist a new record, then make it visible. Once this returns the job
    /// can be read back by id.
    pub async fn create(&self, record: JobRecord) -> DbResult<Arc<JobState>> {
        self.db.upsert_job(&record.to_row()?).await?;
        let state = Arc::new(JobState::new(record));
        self.write()
            .insert(state.id().to_string(), Arc::clone(&state));
        Ok(state)
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobState>> {
        self.read().get(id).cloned()
    }

    /// Views of all known jobs, oldest first, optionally filtered by status.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<JobView> {
        let mut views: Vec<JobView> = self
            .read()
            .values()
            .map(|s| s.view())
            .filter(|v| status.map_or(true, |wanted| v.status == wanted))
            .collect();
        views.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        views
    }

    pub fn non_terminal(&self) -> Vec<Arc<JobState>> {
        self.read()
            .values()
            .filter(|s| !s.status().is_terminal())
            .cloned()
            .collect()
    }

    /// Terminal jobs whose last write is older than `cutoff`.
    pub fn terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<Arc<JobState>> {
        self.read()
            .values()
            .filter(|s| {
                let view = s.view();
                view.status.is_terminal() && view.updated_at < cutoff
            })
            .cloned()
            .collect()
    }

    /// Write the job's current record. Writes for one job are serialized and
    /// always carry the newest snapshot.
    pub async fn persist(&self, state: &JobState) -> DbResult<()> {
        let _guard = state.persist_lock.lock().await;
        let row = state.snapshot().to_row()?;
        self.db.upsert_job(&row).await
    }

    /// Drop a job from memory and from the database.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        self.write().remove(id);
        self.db.delete_job(id).await
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load persisted jobs. Any job that was not terminal when the server
    /// stopped has lost its task and is failed. Returns how many were failed.
    pub async fn restore(&self) -> DbResult<usize> {
        let rows = self.db.list_jobs().await?;
        let mut interrupted = 0;

        for row in rows {
            let id = row.id.clone();
            let record = match JobRecord::try_from(row) {
                Ok(record) => record,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "skipping unreadable job record");
                    continue;
                }
            };

            let state = Arc::new(JobState::new(record));
            if !state.status().is_terminal() && state.fail(INTERRUPTED_ERROR).is_ok() {
                self.persist(&state).await?;
                interrupted += 1;
            }
            self.write().insert(id, state);
        }

        info!(jobs = self.len(), interrupted, "restored job records");
        Ok(interrupted)
    }
}
