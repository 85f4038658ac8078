//! Durable at-least-once job queue and its workers.
//!
//! A job is claimed with a lease. If the lease runs out before the job is
//! completed, failed or rescheduled, the job becomes claimable again, so
//! handlers must tolerate running twice. Recurring work is expressed by the
//! handler returning [`JobOutcome::Reschedule`]; the worker then moves the
//! same job's `run_at` forward instead of enqueueing a new one.

pub mod memory;
pub mod postgres;
pub mod price_cache;
pub mod wallet_monitor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::error::{GoalSyncError, Result};
use crate::utils::logging::{self, LogLevel};

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

pub type JobId = i64;

/// How long a claimed job is reserved for its worker.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Active,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Created or claimed, i.e. still going to run.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = GoalSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(Self::Created),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(GoalSyncError::DecodingError(format!(
                "unknown job state '{other}'"
            ))),
        }
    }
}

/// A job row.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a handler wants done with its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Complete,
    /// Run the same job again after the delay.
    Reschedule(Duration),
}

/// A payload type bound to exactly one queue.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const QUEUE: &'static str;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Creates backing tables, if any.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Creates `name` if it does not exist yet.
    async fn create_queue(&self, name: &str) -> Result<()>;

    /// Adds a job that becomes claimable after `delay` (immediately if `None`).
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<JobId>;

    /// Claims up to `limit` due jobs: created jobs whose `run_at` has passed
    /// and active jobs whose lease has expired.
    async fn claim(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<JobRecord>>;

    /// Marks a created or claimed job `COMPLETED`. Returns `false` when the
    /// job had already finished.
    async fn complete(&self, job_id: JobId) -> Result<bool>;

    /// Marks a claimed job `FAILED`. Returns `false` when the job is no
    /// longer `ACTIVE`.
    async fn fail(&self, job_id: JobId, error: &str) -> Result<bool>;

    /// Puts a claimed job back to `CREATED`, due at `run_at`. Returns `false`
    /// when the job is no longer `ACTIVE`.
    async fn reschedule(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool>;

    /// Jobs in `queue` that are created or claimed.
    async fn list_active(&self, queue: &str) -> Result<Vec<JobRecord>>;
}

/// Serializes `payload` and enqueues it on its queue.
///
/// # Errors
///
/// Propagates serialization and queue failures.
pub async fn send_job<P: JobPayload>(
    queue: &dyn JobQueue,
    payload: &P,
    delay: Option<Duration>,
) -> Result<JobId> {
    let value = serde_json::to_value(payload)?;
    queue.enqueue(P::QUEUE, value, delay).await
}

/// Active jobs of `P`'s queue with their decoded payloads. Rows whose payload
/// no longer decodes are skipped.
///
/// # Errors
///
/// Propagates queue failures.
pub async fn active_jobs<P: JobPayload>(queue: &dyn JobQueue) -> Result<Vec<(JobId, P)>> {
    let records = queue.list_active(P::QUEUE).await?;
    Ok(records
        .into_iter()
        .filter_map(|record| {
            serde_json::from_value(record.payload)
                .ok()
                .map(|payload| (record.id, payload))
        })
        .collect())
}

fn run_at_after(delay: Duration) -> Result<DateTime<Utc>> {
    let delay = chrono::Duration::from_std(delay)
        .map_err(|e| GoalSyncError::InternalError(format!("delay out of range: {e}")))?;
    Ok(Utc::now() + delay)
}

#[async_trait]
pub trait JobHandler<P: JobPayload>: Send + Sync {
    async fn handle(&self, job_id: JobId, payload: P) -> Result<JobOutcome>;
}

/// Pulls due jobs of one queue and runs them with bounded concurrency.
pub struct JobWorker<P, H> {
    queue: Arc<dyn JobQueue>,
    handler: Arc<H>,
    concurrency: usize,
    poll_interval: Duration,
    lease: Duration,
    _payload: PhantomData<fn() -> P>,
}

impl<P, H> JobWorker<P, H>
where
    P: JobPayload,
    H: JobHandler<P> + 'static,
{
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<H>) -> Self {
        Self {
            queue,
            handler,
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            lease: DEFAULT_LEASE,
            _payload: PhantomData,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Claims and runs one batch of due jobs. Returns how many ran.
    ///
    /// # Errors
    ///
    /// Only claiming can fail; per-job failures are recorded on the job.
    pub async fn process_due(&self) -> Result<usize> {
        let jobs = self
            .queue
            .claim(P::QUEUE, self.concurrency, self.lease)
            .await?;
        let count = jobs.len();

        stream::iter(jobs)
            .for_each_concurrent(self.concurrency, |job| self.execute(job))
            .await;

        Ok(count)
    }

    async fn execute(&self, job: JobRecord) {
        let id = job.id;
        let payload: P = match serde_json::from_value(job.payload) {
            Ok(payload) => payload,
            Err(e) => {
                logging::log_error(&format!("Job {id} on {} has a malformed payload", P::QUEUE), &e);
                self.record(self.queue.fail(id, &e.to_string()).await, id);
                return;
            }
        };

        let result = match self.handler.handle(id, payload).await {
            Ok(JobOutcome::Complete) => self.queue.complete(id).await,
            Ok(JobOutcome::Reschedule(delay)) => match run_at_after(delay) {
                Ok(run_at) => self.queue.reschedule(id, run_at).await,
                Err(e) => Err(e),
            },
            Err(e) => {
                logging::log_error(&format!("Job {id} on {} failed", P::QUEUE), &e);
                self.queue.fail(id, &e.to_string()).await
            }
        };
        self.record(result, id);
    }

    fn record(&self, result: Result<bool>, id: JobId) {
        match result {
            Ok(true) => {}
            Ok(false) => logging::log(
                LogLevel::Info,
                &format!("Job {id} on {} was superseded while running", P::QUEUE),
            ),
            Err(e) => logging::log_error(
                &format!("Could not update job {id} on {}; its lease will expire", P::QUEUE),
                &e,
            ),
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        logging::log(
            LogLevel::Info,
            &format!(
                "Worker for '{}' started (concurrency {})",
                P::QUEUE,
                self.concurrency
            ),
        );

        loop {
            if let Err(e) = self.process_due().await {
                logging::log_error(&format!("Claiming jobs on {} failed", P::QUEUE), &e);
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        logging::log(LogLevel::Info, &format!("Worker for '{}' stopped", P::QUEUE));
    }

    /// Creates the queue and spawns [`JobWorker::run`].
    ///
    /// # Errors
    ///
    /// Fails if the queue cannot be created.
    pub async fn spawn(self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        self.queue.create_queue(P::QUEUE).await?;
        Ok(tokio::spawn(self.run(cancel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    impl JobPayload for Ping {
        const QUEUE: &'static str = "ping";
    }

    struct PingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<Ping> for PingHandler {
        async fn handle(&self, _job_id: JobId, payload: Ping) -> Result<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match payload.n {
                0 => Err(GoalSyncError::InternalError("zero".to_string())),
                1 => Ok(JobOutcome::Complete),
                _ => Ok(JobOutcome::Reschedule(Duration::from_secs(60))),
            }
        }
    }

    #[tokio::test]
    async fn test_outcomes_are_persisted() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        queue.create_queue(Ping::QUEUE).await.unwrap();

        let failing = send_job(queue.as_ref(), &Ping { n: 0 }, None).await.unwrap();
        let done = send_job(queue.as_ref(), &Ping { n: 1 }, None).await.unwrap();
        let recurring = send_job(queue.as_ref(), &Ping { n: 2 }, None).await.unwrap();
        queue
            .enqueue(Ping::QUEUE, serde_json::json!({ "bogus": true }), None)
            .await
            .unwrap();

        let handler = Arc::new(PingHandler {
            calls: AtomicUsize::new(0),
        });
        let worker = JobWorker::<Ping, _>::new(queue.clone(), handler.clone()).with_concurrency(8);

        assert_eq!(worker.process_due().await.unwrap(), 4);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let active = queue.list_active(Ping::QUEUE).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, recurring);
        assert_eq!(active[0].state, JobState::Created);
        assert!(active[0].run_at > Utc::now() + chrono::Duration::seconds(30));

        assert_eq!(worker.process_due().await.unwrap(), 0);

        let typed: Vec<(JobId, Ping)> = active_jobs(queue.as_ref()).await.unwrap();
        assert_eq!(typed, vec![(recurring, Ping { n: 2 })]);
        assert_ne!(failing, done);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        let handler = Arc::new(PingHandler {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let task = JobWorker::<Ping, _>::new(queue.clone(), handler.clone())
            .with_poll_interval(Duration::from_millis(5))
            .spawn(cancel.clone())
            .await
            .unwrap();

        send_job(queue.as_ref(), &Ping { n: 1 }, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
