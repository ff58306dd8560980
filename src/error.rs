use bson::oid::ObjectId;
use thiserror::Error;

/// Errors surfaced by queue and backend operations. An empty queue is not an
/// error; polls report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} was not found in the queue")]
    JobNotFound(ObjectId),
    #[error("no backend registered for driver `{0}`")]
    UnknownDriver(String),
    #[error(transparent)]
    EncodeError(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    DecodeError(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    StoreError(#[from] anyhow::Error),
}
