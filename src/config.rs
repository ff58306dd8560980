use serde::{Deserialize, Serialize};

/// Queue configuration. Mirrors the connection-level settings a deployment
/// supplies: which collection holds jobs, the default queue name, and how
/// long a lease may be held before it is presumed abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Logical connection name reported on job handles.
    pub connection: String,
    /// Store connection string, used by driver factories.
    pub uri: String,
    /// Collection holding active job documents.
    pub collection: String,
    /// Collection holding failed-job records.
    pub failed_collection: String,
    /// Queue used when a caller does not name one.
    pub default_queue: String,
    /// Seconds a reservation may be held before reclamation releases it.
    /// `None` disables automatic reclamation entirely.
    pub retry_after: Option<u64>,
    /// Driver name used by the failed-store registry.
    pub failed_driver: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection: "default".to_string(),
            uri: "mongodb://localhost:27017/queue".to_string(),
            collection: "jobs".to_string(),
            failed_collection: "failed_jobs".to_string(),
            default_queue: "default".to_string(),
            retry_after: Some(60),
            failed_driver: "mongodb".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after = seconds;
        self
    }

    pub fn default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn failed_driver(mut self, driver: impl Into<String>) -> Self {
        self.failed_driver = driver.into();
        self
    }

    /// Resolve an optional caller-supplied queue name to a concrete one.
    pub(crate) fn queue_or_default<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }
}
