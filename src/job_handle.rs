use std::sync::Arc;

use bincode::Decode;
use bson::oid::ObjectId;
use bson::DateTime;

use crate::error::QueueError;
use crate::store::{FailedJobStore, JobStore};
use crate::types::{FailedJobRecord, JobRecord};

/// A reserved job, handed to the execution harness.
///
/// The handle owns the post-reservation record and back-references to the
/// stores, so the harness can finish the job without going through the queue.
pub struct JobHandle {
    record: JobRecord,
    store: Arc<dyn JobStore>,
    failed: Arc<dyn FailedJobStore>,
    connection: String,
    queue: String,
}

impl JobHandle {
    pub(crate) fn new(
        record: JobRecord,
        store: Arc<dyn JobStore>,
        failed: Arc<dyn FailedJobStore>,
        connection: String,
        queue: String,
    ) -> Self {
        Self {
            record,
            store,
            failed,
            connection,
            queue,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.record.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn attempts(&self) -> u32 {
        self.record.attempts as u32
    }

    pub fn payload(&self) -> &[u8] {
        &self.record.payload.bytes
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Decode the payload the producer enqueued.
    pub fn decode<P: Decode>(&self) -> Result<P, QueueError> {
        let (decoded, _) =
            bincode::decode_from_slice(&self.record.payload.bytes, bincode::config::standard())?;
        Ok(decoded)
    }

    /// The job succeeded; remove it permanently.
    pub async fn complete(self) -> Result<(), QueueError> {
        self.store.delete(self.record.id).await
    }

    /// Recoverable failure; put the job back in the pool right away,
    /// keeping its attempts count, rather than waiting out the retry window.
    pub async fn release(self) -> Result<(), QueueError> {
        self.store
            .release(self.record.id, self.record.attempts, None)
            .await
    }

    /// Unrecoverable failure; record it in the failed-job store and remove
    /// it from the active collection. Recorded before deletion so a crash in
    /// between duplicates the record instead of losing the job.
    pub async fn dead(self, exception: &str) -> Result<(), QueueError> {
        self.failed
            .record(FailedJobRecord {
                queue: self.record.queue.clone(),
                payload: self.record.payload.clone(),
                exception: exception.to_string(),
                failed_at: DateTime::now(),
            })
            .await?;
        self.store.delete(self.record.id).await
    }
}
