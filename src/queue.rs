use std::sync::Arc;

use bincode::Encode;
use bson::oid::ObjectId;
use bson::{Binary, DateTime};
use chrono::{Duration, Utc};
use tracing::instrument;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job_handle::JobHandle;
use crate::mongo::{connect_database, MongoFailedJobStore, MongoJobStore};
use crate::store::{FailedJobStore, JobStore};
use crate::types::JobRecord;

/// A job queue over an injected storage backend.
///
/// Concurrency safety comes entirely from the backend's atomic
/// `reserve_next`; the queue itself holds no locks. Each poll performs a
/// bounded number of store round-trips and returns; sleep and retry cadence
/// between polls belong to the caller.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
    failed: Arc<dyn FailedJobStore>,
    config: QueueConfig,
    bincode_config: bincode::config::Configuration,
}

impl Queue {
    pub fn new(
        store: Arc<dyn JobStore>,
        failed: Arc<dyn FailedJobStore>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            failed,
            config,
            bincode_config: bincode::config::standard(),
        }
    }

    /// Connect a queue where both jobs and failed jobs live in MongoDB.
    pub async fn mongodb(
        config: QueueConfig,
        cert_file: Option<String>,
    ) -> Result<Self, mongodb::error::Error> {
        let database = connect_database(&config.uri, cert_file).await?;
        let store = Arc::new(MongoJobStore::new(&database, &config.collection));
        let failed = Arc::new(MongoFailedJobStore::new(&database, &config.failed_collection));
        Ok(Self::new(store, failed, config))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Poll the queue once: reclaim expired leases (when a retry timeout is
    /// configured), then reserve the next eligible job. `None` means the
    /// queue is empty; the caller decides when to poll again.
    #[instrument(skip_all, err)]
    pub async fn pop(&self, queue: Option<&str>) -> Result<Option<JobHandle>, QueueError> {
        self.pop_at(queue, DateTime::now()).await
    }

    /// `pop` against an explicit clock.
    pub async fn pop_at(
        &self,
        queue: Option<&str>,
        now: DateTime,
    ) -> Result<Option<JobHandle>, QueueError> {
        let queue = self.config.queue_or_default(queue);

        if let Some(retry_after) = self.config.retry_after {
            self.release_expired(queue, now, retry_after).await?;
        }

        let record = self.store.reserve_next(queue, now).await?;
        Ok(record.map(|record| {
            JobHandle::new(
                record,
                Arc::clone(&self.store),
                Arc::clone(&self.failed),
                self.config.connection.clone(),
                queue.to_string(),
            )
        }))
    }

    /// Release every lease on `queue` older than the retry window. A worker
    /// that crashed or hung past `retry_after` is presumed dead; its job
    /// re-enters the eligible pool and the next reservation picks it up.
    ///
    /// Each release is keyed on the `reserved_at` observed during the scan,
    /// so a reservation freshly taken by another poller is never clobbered.
    async fn release_expired(
        &self,
        queue: &str,
        now: DateTime,
        retry_after: u64,
    ) -> Result<(), QueueError> {
        let expiration =
            DateTime::from_millis(now.timestamp_millis() - (retry_after as i64) * 1000);

        for job in self.store.expired_leases(queue, expiration).await? {
            tracing::debug!(job_id = %job.id, attempts = job.attempts, "releasing expired lease");
            self.store
                .release(job.id, job.attempts, job.reserved_at)
                .await?;
        }

        Ok(())
    }

    /// Enqueue a job available immediately.
    #[instrument(skip_all, err, fields(payload_size))]
    pub async fn push<P>(&self, queue: Option<&str>, payload: P) -> Result<ObjectId, QueueError>
    where
        P: Encode,
    {
        self.enqueue(queue, payload, Duration::zero()).await
    }

    /// Enqueue a job that becomes available after `delay`.
    #[instrument(skip_all, err, fields(payload_size))]
    pub async fn later<P>(
        &self,
        delay: Duration,
        queue: Option<&str>,
        payload: P,
    ) -> Result<ObjectId, QueueError>
    where
        P: Encode,
    {
        self.enqueue(queue, payload, delay).await
    }

    async fn enqueue<P>(
        &self,
        queue: Option<&str>,
        payload: P,
        delay: Duration,
    ) -> Result<ObjectId, QueueError>
    where
        P: Encode,
    {
        let payload = bincode::encode_to_vec(&payload, self.bincode_config)?;
        tracing::Span::current().record("payload_size", payload.len());

        let now = Utc::now();
        let record = JobRecord {
            id: ObjectId::new(),
            queue: self.config.queue_or_default(queue).to_string(),
            payload: Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: payload,
            },
            attempts: 0,
            reserved: false,
            reserved_at: None,
            available_at: DateTime::from_millis(
                now.timestamp_millis() + delay.num_milliseconds(),
            ),
            created_at: DateTime::from_millis(now.timestamp_millis()),
        };

        self.store.insert(record).await
    }

    /// Permanently remove a reserved job; called on successful completion.
    #[instrument(skip_all, err)]
    pub async fn delete_reserved(&self, _queue: &str, id: ObjectId) -> Result<(), QueueError> {
        self.store.delete(id).await
    }

    /// Explicitly release a job back to the pool, preserving the given
    /// attempts count. Used on recoverable failure instead of waiting for
    /// timeout-based reclamation.
    #[instrument(skip_all, err)]
    pub async fn release(&self, id: ObjectId, attempts: i64) -> Result<(), QueueError> {
        self.store.release(id, attempts, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFailedJobStore, MemoryJobStore};

    fn queue(retry_after: Option<u64>) -> (Queue, Arc<MemoryJobStore>, Arc<MemoryFailedJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let failed = Arc::new(MemoryFailedJobStore::new());
        let config = QueueConfig::default().retry_after(retry_after);
        (
            Queue::new(store.clone(), failed.clone(), config),
            store,
            failed,
        )
    }

    fn millis_from_now(offset: i64) -> DateTime {
        DateTime::from_millis(Utc::now().timestamp_millis() + offset)
    }

    #[tokio::test]
    async fn pop_reserves_and_second_pop_finds_nothing() {
        let (queue, _, _) = queue(Some(60));
        let id = queue.push(None, vec![1u32, 2, 3]).await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(handle.id(), id);
        assert_eq!(handle.attempts(), 1);

        assert!(queue.pop(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_and_reserved_again() {
        let (queue, _, _) = queue(Some(60));
        let id = queue.push(None, vec![1u32]).await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 1);
        drop(handle);

        // Just inside the retry window nothing is eligible.
        assert!(queue
            .pop_at(None, millis_from_now(59_000))
            .await
            .unwrap()
            .is_none());

        // Past the window the same poll reclaims and re-reserves.
        let handle = queue
            .pop_at(None, millis_from_now(61_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.id(), id);
        assert_eq!(handle.attempts(), 2);
    }

    #[tokio::test]
    async fn reclamation_boundary_is_exact() {
        let (queue, store, _) = queue(Some(60));
        let now = DateTime::from_millis(1_000_000);
        let expiration = DateTime::from_millis(1_000_000 - 60_000);

        let mut stale = JobRecord {
            id: ObjectId::new(),
            queue: "default".to_string(),
            payload: Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: Vec::new(),
            },
            attempts: 1,
            reserved: true,
            reserved_at: Some(DateTime::from_millis(expiration.timestamp_millis() - 1)),
            available_at: DateTime::from_millis(0),
            created_at: DateTime::from_millis(0),
        };
        let stale_id = stale.id;
        store.insert(stale.clone()).await.unwrap();

        stale.id = ObjectId::new();
        stale.reserved_at = Some(DateTime::from_millis(expiration.timestamp_millis() + 1));
        store.insert(stale).await.unwrap();

        // Only the lease strictly older than the window comes back.
        let handle = queue.pop_at(None, now).await.unwrap().unwrap();
        assert_eq!(handle.id(), stale_id);
        assert_eq!(handle.attempts(), 2);
        assert!(queue.pop_at(None, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_job_is_not_eligible_until_available() {
        let (queue, _, _) = queue(Some(60));
        queue
            .later(Duration::seconds(60), None, vec![1u32])
            .await
            .unwrap();

        assert!(queue.pop(None).await.unwrap().is_none());
        assert!(queue
            .pop_at(None, millis_from_now(61_000))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let (queue, _, _) = queue(Some(60));
        queue.push(Some("mail"), vec![1u32]).await.unwrap();

        assert!(queue.pop(Some("reports")).await.unwrap().is_none());
        assert!(queue.pop(Some("mail")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn explicit_release_preserves_attempts() {
        let (queue, _, _) = queue(Some(60));
        let id = queue.push(None, vec![1u32]).await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 1);
        handle.release().await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(handle.id(), id);
        assert_eq!(handle.attempts(), 2);
    }

    #[tokio::test]
    async fn double_release_is_idempotent() {
        let (queue, store, _) = queue(Some(60));
        let id = queue.push(None, vec![1u32]).await.unwrap();
        queue.pop(None).await.unwrap().unwrap();

        queue.release(id, 1).await.unwrap();
        queue.release(id, 1).await.unwrap();

        let job = &store.jobs()[0];
        assert!(!job.reserved);
        assert_eq!(job.reserved_at, None);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn completed_job_never_comes_back() {
        let (queue, store, _) = queue(Some(60));
        queue.push(None, vec![1u32]).await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        handle.complete().await.unwrap();

        assert!(queue
            .pop_at(None, millis_from_now(3_600_000))
            .await
            .unwrap()
            .is_none());
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn dead_job_is_recorded_and_removed() {
        let (queue, store, failed) = queue(Some(60));
        queue.push(Some("mail"), vec![1u32]).await.unwrap();

        let handle = queue.pop(Some("mail")).await.unwrap().unwrap();
        handle.dead("worker panicked").await.unwrap();

        assert!(store.jobs().is_empty());
        let failed = failed.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].queue, "mail");
        assert_eq!(failed[0].exception, "worker panicked");
    }

    #[tokio::test]
    async fn payload_round_trips_through_handle() {
        let (queue, _, _) = queue(Some(60));
        let payload = vec![7u32, 8, 9];
        queue.push(None, payload.clone()).await.unwrap();

        let handle = queue.pop(None).await.unwrap().unwrap();
        let decoded: Vec<u32> = handle.decode().unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_pollers_never_share_a_job() {
        let (queue, _, _) = queue(None);
        for _ in 0..4 {
            queue.push(None, vec![1u32]).await.unwrap();
        }

        let mut polls = Vec::new();
        for _ in 0..16 {
            let queue = queue.clone();
            polls.push(tokio::spawn(async move { queue.pop(None).await.unwrap() }));
        }

        let mut reserved = Vec::new();
        for poll in polls {
            if let Some(handle) = poll.await.unwrap() {
                assert_eq!(handle.attempts(), 1);
                reserved.push(handle.id());
            }
        }

        reserved.sort();
        reserved.dedup();
        assert_eq!(reserved.len(), 4);
    }
}
