// crates/server/src/jobs/state.rs
//! State tracking for a single background job.

use std::sync::{RwLock, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_stream::Stream;

use super::types::{JobId, JobKind, JobRecord, JobStatus, JobView};

/// A state write the job lifecycle does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("Job {id} is already {status}")]
    Terminal { id: JobId, status: JobStatus },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Live state for one job.
///
/// The record sits behind a lock; every accepted write publishes a fresh
/// [`JobView`] on a `watch` channel, so subscribers always see the latest
/// value and a late subscriber still gets the terminal one.
pub struct JobState {
    id: JobId,
    kind: JobKind,
    target_project_id: Option<String>,
    record: RwLock<JobRecord>,
    view_tx: watch::Sender<JobView>,
    /// Serializes writes of this job's row so an older snapshot never lands
    /// after a newer one.
    pub(crate) persist_lock: Mutex<()>,
}

impl JobState {
    pub fn new(record: JobRecord) -> Self {
        let (view_tx, _) = watch::channel(JobView::from(&record));
        Self {
            id: record.id.clone(),
            kind: record.kind,
            target_project_id: record.target_project_id.clone(),
            record: RwLock::new(record),
            view_tx,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn target_project_id(&self) -> Option<&str> {
        self.target_project_id.as_deref()
    }

    /// Copy of the full record.
    pub fn snapshot(&self) -> JobRecord {
        match self.record.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::error!(job_id = %self.id, "job record lock poisoned on read");
                poisoned.into_inner().clone()
            }
        }
    }

    /// The latest published view.
    pub fn view(&self) -> JobView {
        self.view_tx.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.view_tx.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.view_tx.subscribe()
    }

    /// Transition `pending -> in_progress`.
    pub fn start(&self) -> Result<JobRecord, JobStateError> {
        self.write(|record| transition(record, JobStatus::InProgress))
    }

    /// Record progress on a running job.
    ///
    /// `current` never goes backwards and `total` is fixed by the first
    /// non-zero value; later values that disagree are ignored.
    pub fn report(
        &self,
        current: u64,
        total: u64,
        message: Option<String>,
    ) -> Result<JobRecord, JobStateError> {
        self.write(|record| {
            if record.status != JobStatus::InProgress {
                return Err(reject(record, JobStatus::InProgress));
            }
            if record.progress.total == 0 {
                record.progress.total = total;
            } else if total != 0 && total != record.progress.total {
                tracing::debug!(
                    job_id = %record.id,
                    fixed = record.progress.total,
                    reported = total,
                    "ignoring change to job total"
                );
            }
            record.progress.current = record.progress.current.max(current);
            if message.is_some() {
                record.progress.message = message;
            }
            Ok(())
        })
    }

    /// Terminal success; the result is set once and never changes.
    pub fn complete(&self, result: Value) -> Result<JobRecord, JobStateError> {
        self.write(|record| {
            transition(record, JobStatus::Completed)?;
            record.result = Some(result);
            Ok(())
        })
    }

    /// Terminal failure with a readable error; no result is recorded.
    pub fn fail(&self, error: impl Into<String>) -> Result<JobRecord, JobStateError> {
        let error = error.into();
        self.write(|record| {
            transition(record, JobStatus::Failed)?;
            record.error = Some(error);
            Ok(())
        })
    }

    fn write(
        &self,
        f: impl FnOnce(&mut JobRecord) -> Result<(), JobStateError>,
    ) -> Result<JobRecord, JobStateError> {
        let mut guard = self.lock_record();
        f(&mut guard)?;
        guard.updated_at = Utc::now();
        let snapshot = guard.clone();
        // Published under the lock so views go out in write order.
        self.view_tx.send_replace(JobView::from(&snapshot));
        Ok(snapshot)
    }

    fn lock_record(&self) -> RwLockWriteGuard<'_, JobRecord> {
        match self.record.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_id = %self.id, "job record lock poisoned on write");
                poisoned.into_inner()
            }
        }
    }
}

fn reject(record: &JobRecord, to: JobStatus) -> JobStateError {
    if record.status.is_terminal() {
        JobStateError::Terminal {
            id: record.id.clone(),
            status: record.status,
        }
    } else {
        JobStateError::InvalidTransition {
            id: record.id.clone(),
            from: record.status,
            to,
        }
    }
}

fn transition(record: &mut JobRecord, to: JobStatus) -> Result<(), JobStateError> {
    if !record.status.can_transition_to(to) {
        return Err(reject(record, to));
    }
    record.status = to;
    Ok(())
}

/// Stream a job's views: the current one immediately, then each newer value
/// the subscriber gets around to (intermediate values may be coalesced), and
/// finally the terminal view, after which the stream ends.
pub fn progress_stream(state: std::sync::Arc<JobState>) -> impl Stream<Item = JobView> {
    async_stream::stream! {
        let mut rx = state.subscribe();
        loop {
            let view = rx.borrow_and_update().clone();
            let terminal = view.status.is_terminal();
            yield view;
            if terminal || rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn job() -> JobState {
        JobState::new(JobRecord::new(
            JobKind::GenerateAnswers,
            Some("p1".into()),
            json!({}),
        ))
    }

    #[test]
    fn test_job_state_lifecycle() {
        let state = job();
        assert_eq!(state.status(), JobStatus::Pending);

        state.start().unwrap();
        assert_eq!(state.status(), JobStatus::InProgress);

        state.report(1, 2, Some("answered 1/2".into())).unwrap();
        let record = state.report(2, 2, None).unwrap();
        assert_eq!(record.progress.current, 2);
        assert_eq!(record.progress.message.as_deref(), Some("answered 1/2"));

        let record = state.complete(json!({"answers": []})).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.error.is_none());
        assert_eq!(state.view().result, Some(json!({"answers": []})));
    }

    #[test]
    fn test_terminal_state_never_changes() {
        let state = job();
        state.start().unwrap();
        state.fail("generator unavailable").unwrap();

        assert!(matches!(
            state.complete(json!({})),
            Err(JobStateError::Terminal { status: JobStatus::Failed, .. })
        ));
        assert!(state.fail("again").is_err());
        assert!(state.report(5, 5, None).is_err());

        let record = state.snapshot();
        assert_eq!(record.error.as_deref(), Some("generator unavailable"));
        assert!(record.result.is_none());
    }

    #[test]
    fn test_progress_requires_running_job() {
        let state = job();
        assert!(matches!(
            state.report(1, 1, None),
            Err(JobStateError::InvalidTransition { from: JobStatus::Pending, .. })
        ));
        assert!(state.complete(json!({})).is_err());
        // A pending job may still fail outright.
        assert!(state.fail("interrupted").is_ok());
    }

    #[test]
    fn test_current_never_decreases_and_total_is_fixed() {
        let state = job();
        state.start().unwrap();
        state.report(3, 5, None).unwrap();
        let record = state.report(1, 9, None).unwrap();
        assert_eq!(record.progress.current, 3);
        assert_eq!(record.progress.total, 5);
    }

    #[test]
    fn test_every_write_bumps_updated_at() {
        let state = job();
        let created = state.snapshot().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let started = state.start().unwrap();
        assert!(started.updated_at > created);
    }

    #[tokio::test]
    async fn test_stream_replays_and_ends_after_terminal() {
        let state = Arc::new(job());
        state.start().unwrap();
        state.report(1, 2, None).unwrap();

        let mut stream = Box::pin(progress_stream(Arc::clone(&state)));
        let first = stream.next().await.unwrap();
        assert_eq!(first.current, Some(1));

        state.report(2, 2, None).unwrap();
        state.complete(json!({"ok": true})).unwrap();

        let mut last = None;
        while let Some(view) = stream.next().await {
            last = Some(view);
        }
        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.current, Some(2));
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_terminal_view() {
        let state = Arc::new(job());
        state.start().unwrap();
        state.fail("boom").unwrap();

        let views: Vec<JobView> = progress_stream(state).collect().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, JobStatus::Failed);
        assert_eq!(views[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_stream_fans_out_to_many_subscribers() {
        let state = Arc::new(job());
        let a = tokio::spawn(progress_stream(Arc::clone(&state)).collect::<Vec<_>>());
        let b = tokio::spawn(progress_stream(Arc::clone(&state)).collect::<Vec<_>>());
        tokio::task::yield_now().await;

        state.start().unwrap();
        state.complete(json!({})).unwrap();

        for views in [a.await.unwrap(), b.await.unwrap()] {
            assert_eq!(views.last().unwrap().status, JobStatus::Completed);
            let statuses: Vec<JobStatus> = views.iter().map(|v| v.status).collect();
            let mut sorted = statuses.clone();
            sorted.sort_by_key(|s| *s as u8);
            assert_eq!(statuses, sorted);
        }
    }
}
