//! In-process job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{JobId, JobQueue, JobRecord, JobState, run_at_after};
use crate::common::error::{GoalSyncError, Result};

#[derive(Default)]
struct QueueState {
    next_id: JobId,
    queues: HashSet<String>,
    jobs: BTreeMap<JobId, JobRecord>,
}

impl QueueState {
    fn job_mut(&mut self, job_id: JobId) -> Result<&mut JobRecord> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| GoalSyncError::NotFound(format!("job {job_id}")))
    }
}

/// [`JobQueue`] kept in memory. Jobs do not survive a restart.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_due(job: &JobRecord, queue: &str, now: DateTime<Utc>) -> bool {
    if job.queue != queue {
        return false;
    }
    match job.state {
        JobState::Created => job.run_at <= now,
        JobState::Active => job.lease_expires_at.is_some_and(|lease| lease < now),
        JobState::Completed | JobState::Failed => false,
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn create_queue(&self, name: &str) -> Result<()> {
        self.state.lock().await.queues.insert(name.to_string());
        Ok(())
    }

    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<JobId> {
        let run_at = run_at_after(delay.unwrap_or_default())?;
        let mut state = self.state.lock().await;
        if !state.queues.contains(queue) {
            return Err(GoalSyncError::NotFound(format!("queue '{queue}'")));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.jobs.insert(
            id,
            JobRecord {
                id,
                queue: queue.to_string(),
                payload,
                state: JobState::Created,
                run_at,
                attempts: 0,
                lease_expires_at: None,
                last_error: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn claim(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<JobRecord>> {
        let lease_until = run_at_after(lease)?;
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let mut due: Vec<&mut JobRecord> = state
            .jobs
            .values_mut()
            .filter(|job| is_due(job, queue, now))
            .collect();
        due.sort_by_key(|job| job.run_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.state = JobState::Active;
                job.attempts += 1;
                job.lease_expires_at = Some(lease_until);
                job.clone()
            })
            .collect())
    }

    async fn complete(&self, job_id: JobId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if !job.state.is_active() {
            return Ok(false);
        }
        job.state = JobState::Completed;
        job.lease_expires_at = None;
        Ok(true)
    }

    async fn fail(&self, job_id: JobId, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if job.state != JobState::Active {
            return Ok(false);
        }
        job.state = JobState::Failed;
        job.lease_expires_at = None;
        job.last_error = Some(error.to_string());
        Ok(true)
    }

    async fn reschedule(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if job.state != JobState::Active {
            return Ok(false);
        }
        job.state = JobState::Created;
        job.run_at = run_at;
        job.lease_expires_at = None;
        Ok(true)
    }

    async fn list_active(&self, queue: &str) -> Result<Vec<JobRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .values()
            .filter(|job| job.queue == queue && job.state.is_active())
            .cloned()
            .collect())
    }
}
