use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::DateTime;

use crate::error::QueueError;
use crate::types::{FailedJobRecord, JobRecord};

/// Storage backend for job documents.
///
/// The queue is composed with a `JobStore` rather than subclassing a
/// concrete driver, so document and relational stores are interchangeable.
/// The one non-negotiable requirement is `reserve_next`: for any given
/// document, concurrent callers must see at most one winner.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically pick the eligible job with the smallest `available_at`
    /// (ties broken by the store's natural order), mark it reserved, bump
    /// `attempts`, and return the document as it exists *after* the update.
    ///
    /// Eligible means `queue` matches, `reserved != true` and
    /// `available_at <= now`. `None` means the queue is empty.
    async fn reserve_next(
        &self,
        queue: &str,
        now: DateTime,
    ) -> Result<Option<JobRecord>, QueueError>;

    /// All jobs on `queue` whose lease started at or before `expired_before`.
    async fn expired_leases(
        &self,
        queue: &str,
        expired_before: DateTime,
    ) -> Result<Vec<JobRecord>, QueueError>;

    /// Clear a job's reservation and write back `attempts`.
    ///
    /// With `expected_reserved_at` set, the update only applies while the
    /// stored `reserved_at` still matches; a fresh reservation that raced in
    /// between keeps its state. Releasing an already-released job is a no-op.
    async fn release(
        &self,
        id: ObjectId,
        attempts: i64,
        expected_reserved_at: Option<DateTime>,
    ) -> Result<(), QueueError>;

    /// Permanently remove a job document.
    async fn delete(&self, id: ObjectId) -> Result<(), QueueError>;

    /// Insert a new job document, returning its id.
    async fn insert(&self, record: JobRecord) -> Result<ObjectId, QueueError>;
}

/// Insert-only store for jobs the harness has given up on.
#[async_trait]
pub trait FailedJobStore: Send + Sync {
    async fn record(&self, failed: FailedJobRecord) -> Result<(), QueueError>;
}
