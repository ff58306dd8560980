use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::memory::MemoryFailedJobStore;
use crate::mongo::{connect_database, MongoFailedJobStore};
use crate::store::FailedJobStore;

/// Builds a failed-job store for one driver.
#[async_trait]
pub trait FailedStoreFactory: Send + Sync {
    async fn create(&self, config: &QueueConfig) -> Result<Arc<dyn FailedJobStore>, QueueError>;
}

/// Registry of failed-job store drivers, consulted once at bootstrap.
///
/// The configured `failed_driver` name selects which backend records failed
/// jobs; deployments add their own drivers with `register`.
pub struct StoreRegistry {
    factories: HashMap<String, Box<dyn FailedStoreFactory>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in `mongodb` and `memory` drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mongodb", Box::new(MongoFailedStoreFactory::default()));
        registry.register("memory", Box::new(MemoryFailedStoreFactory));
        registry
    }

    pub fn register(&mut self, driver: impl Into<String>, factory: Box<dyn FailedStoreFactory>) {
        self.factories.insert(driver.into(), factory);
    }

    /// Build the failed-job store named by `config.failed_driver`.
    pub async fn create(
        &self,
        config: &QueueConfig,
    ) -> Result<Arc<dyn FailedJobStore>, QueueError> {
        match self.factories.get(&config.failed_driver) {
            Some(factory) => factory.create(config).await,
            None => Err(QueueError::UnknownDriver(config.failed_driver.clone())),
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Records failed jobs in a MongoDB collection on the configured connection.
#[derive(Debug, Default)]
pub struct MongoFailedStoreFactory {
    pub cert_file: Option<String>,
}

#[async_trait]
impl FailedStoreFactory for MongoFailedStoreFactory {
    async fn create(&self, config: &QueueConfig) -> Result<Arc<dyn FailedJobStore>, QueueError> {
        let database = connect_database(&config.uri, self.cert_file.clone())
            .await
            .context("Failed to connect the failed-job store")?;
        Ok(Arc::new(MongoFailedJobStore::new(
            &database,
            &config.failed_collection,
        )))
    }
}

/// Keeps failed jobs in process memory.
#[derive(Debug, Default)]
pub struct MemoryFailedStoreFactory;

#[async_trait]
impl FailedStoreFactory for MemoryFailedStoreFactory {
    async fn create(&self, _config: &QueueConfig) -> Result<Arc<dyn FailedJobStore>, QueueError> {
        Ok(Arc::new(MemoryFailedJobStore::new()))
    }
}
