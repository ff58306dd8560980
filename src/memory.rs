use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::DateTime;

use crate::error::QueueError;
use crate::store::{FailedJobStore, JobStore};
use crate::types::{FailedJobRecord, JobRecord};

/// Job storage held in process memory.
///
/// The mutex plays the role MongoDB's `findOneAndUpdate` plays for the
/// document backend: reservation is a single critical section, so concurrent
/// pollers still see at most one winner per job. Natural order is insertion
/// order.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job document, in natural order.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn reserve_next(
        &self,
        queue: &str,
        now: DateTime,
    ) -> Result<Option<JobRecord>, QueueError> {
        let mut jobs = self.lock();

        let mut winner: Option<usize> = None;
        for (index, job) in jobs.iter().enumerate() {
            if job.queue != queue || !job.is_eligible(now) {
                continue;
            }
            match winner {
                Some(best) if jobs[best].available_at <= job.available_at => {}
                _ => winner = Some(index),
            }
        }

        Ok(winner.map(|index| {
            let job = &mut jobs[index];
            job.reserved = true;
            job.reserved_at = Some(now);
            job.attempts += 1;
            job.clone()
        }))
    }

    async fn expired_leases(
        &self,
        queue: &str,
        expired_before: DateTime,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let jobs = self.lock();
        Ok(jobs
            .iter()
            .filter(|job| {
                job.queue == queue
                    && job
                        .reserved_at
                        .map_or(false, |reserved_at| reserved_at <= expired_before)
            })
            .cloned()
            .collect())
    }

    async fn release(
        &self,
        id: ObjectId,
        attempts: i64,
        expected_reserved_at: Option<DateTime>,
    ) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            if let Some(expected) = expected_reserved_at {
                if job.reserved_at != Some(expected) {
                    return Ok(());
                }
            }
            job.reserved = false;
            job.reserved_at = None;
            job.attempts = attempts;
        }
        Ok(())
    }

    async fn delete(&self, id: ObjectId) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        if jobs.len() == before {
            Err(QueueError::JobNotFound(id))
        } else {
            Ok(())
        }
    }

    async fn insert(&self, record: JobRecord) -> Result<ObjectId, QueueError> {
        let id = record.id;
        self.lock().push(record);
        Ok(id)
    }
}

/// Failed-job recorder held in process memory.
#[derive(Debug, Default)]
pub struct MemoryFailedJobStore {
    failed: Mutex<Vec<FailedJobRecord>>,
}

impl MemoryFailedJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every failed-job record.
    pub fn failed(&self) -> Vec<FailedJobRecord> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FailedJobStore for MemoryFailedJobStore {
    async fn record(&self, failed: FailedJobRecord) -> Result<(), QueueError> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failed);
        Ok(())
    }
}
