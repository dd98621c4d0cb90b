// crates/server/src/jobs/gate.rs
//! Per-project admission: at most one in-flight job per project.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::types::{JobId, JobKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub job_id: JobId,
    pub kind: JobKind,
}

type Slots = Arc<Mutex<HashMap<String, Holder>>>;

/// Grants one [`ProjectPermit`] per project at a time. A second request
/// for a busy project is refused rather than queued.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGate {
    slots: Slots,
}

/// Held by a job for as long as it may write to its project. Dropping it
/// (normal exit, panic or abort) frees the project.
#[derive(Debug)]
pub struct ProjectPermit {
    slots: Slots,
    project_id: String,
    job_id: JobId,
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Holder>> {
    slots.lock().unwrap_or_else(|poisoned| {
        tracing::error!("admission gate lock poisoned");
        poisoned.into_inner()
    })
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `project_id` for `job_id`, or return the current holder.
    pub fn try_acquire(
        &self,
        project_id: &str,
        job_id: &str,
        kind: JobKind,
    ) -> Result<ProjectPermit, Holder> {
        let mut slots = lock(&self.slots);
        if let Some(holder) = slots.get(project_id) {
            return Err(holder.clone());
        }
        slots.insert(
            project_id.to_string(),
            Holder {
                job_id: job_id.to_string(),
                kind,
            },
        );
        Ok(ProjectPermit {
            slots: Arc::clone(&self.slots),
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
        })
    }

    pub fn holder(&self, project_id: &str) -> Option<Holder> {
        lock(&self.slots).get(project_id).cloned()
    }

    /// Free `project_id` if `job_id` still holds it. Returns whether a slot
    /// was freed.
    pub fn release(&self, project_id: &str, job_id: &str) -> bool {
        release(&self.slots, project_id, job_id)
    }
}

fn release(slots: &Slots, project_id: &str, job_id: &str) -> bool {
    let mut slots = lock(slots);
    match slots.get(project_id) {
        Some(holder) if holder.job_id == job_id => {
            slots.remove(project_id);
            true
        }
        _ => false,
    }
}

impl ProjectPermit {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for ProjectPermit {
    fn drop(&mut self) {
        release(&self.slots, &self.project_id, &self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_job_for_project_is_refused() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire("p1", "j1", JobKind::GenerateAnswers).unwrap();
        assert_eq!(permit.project_id(), "p1");

        let holder = gate.try_acquire("p1", "j2", JobKind::IndexDocument).unwrap_err();
        assert_eq!(holder.job_id, "j1");
        assert_eq!(holder.kind, JobKind::GenerateAnswers);

        // Other projects are unaffected.
        assert!(gate.try_acquire("p2", "j3", JobKind::IndexAll).is_ok());
    }

    #[test]
    fn test_dropping_permit_frees_project() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire("p1", "j1", JobKind::IndexAll).unwrap();
        drop(permit);
        assert!(gate.holder("p1").is_none());
        assert!(gate.try_acquire("p1", "j2", JobKind::IndexAll).is_ok());
    }

    #[test]
    fn test_release_only_frees_own_slot() {
        let gate = AdmissionGate::new();
        let stale = gate.try_acquire("p1", "j1", JobKind::GenerateAnswers).unwrap();
        assert!(gate.release("p1", "j1"));

        let _fresh = gate.try_acquire("p1", "j2", JobKind::GenerateAnswers).unwrap();
        // The released job's permit must not evict its successor.
        drop(stale);
        assert!(!gate.release("p1", "j1"));
        assert_eq!(gate.holder("p1").unwrap().job_id, "j2");
    }
}
