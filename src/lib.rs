//! A job queue for document stores, built around one primitive: an atomic
//! find-and-reserve.
//!
//! Any number of worker processes may poll the same collection. Reservation
//! happens in a single conditional read-modify operation on the store, so
//! only one poller ever wins a given job; leases abandoned by crashed
//! workers are released back into the pool once they outlive the configured
//! retry window.
//!
//! Storage is a pluggable seam: [`store::JobStore`] has a MongoDB
//! implementation ([`mongo::MongoJobStore`]) and an in-memory one
//! ([`memory::MemoryJobStore`]) that doubles as the test backend.

pub mod config;
pub mod error;
pub mod job_handle;
pub mod memory;
pub mod mongo;
pub mod queue;
pub mod registry;
pub mod store;
pub mod types;

pub use config::QueueConfig;
pub use error::QueueError;
pub use job_handle::JobHandle;
pub use queue::Queue;
pub use registry::StoreRegistry;
pub use store::{FailedJobStore, JobStore};
pub use types::{FailedJobRecord, JobRecord};
