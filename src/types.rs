use bson::oid::ObjectId;
use bson::{Binary, DateTime};
use serde::{Deserialize, Serialize};

/// One queued unit of work. Field names are part of the wire contract with
/// the execution harness and the failed-job store and must not be renamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub queue: String,
    pub payload: Binary,
    pub attempts: i64,
    pub reserved: bool,
    pub reserved_at: Option<DateTime>,
    pub available_at: DateTime,
    pub created_at: DateTime,
}

impl JobRecord {
    /// A job may be reserved iff it is unreserved and its availability time
    /// has passed.
    pub fn is_eligible(&self, now: DateTime) -> bool {
        !self.reserved && self.available_at <= now
    }
}

/// Insert-only record handed to the failed-job store when the harness gives
/// up on a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub queue: String,
    pub payload: Binary,
    pub exception: String,
    pub failed_at: DateTime,
}
