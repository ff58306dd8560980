use anyhow::Context;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, DateTime};
use mongodb::options::{
    ClientOptions, ConnectionString, FindOneAndUpdateOptions, ReturnDocument, Tls, TlsOptions,
};
use mongodb::{Client, Collection, Database};

use crate::error::QueueError;
use crate::store::{FailedJobStore, JobStore};
use crate::types::{FailedJobRecord, JobRecord};

/// Job storage backed by a MongoDB collection.
///
/// Reservation maps onto `findOneAndUpdate`, which locks and flags the next
/// job record in a single server-side operation. That is what makes
/// concurrent pollers safe: only one caller's mutation wins per document.
#[derive(Clone)]
pub struct MongoJobStore {
    collection: Collection<JobRecord>,
}

impl MongoJobStore {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
        }
    }

    /// Connect to `uri` and use its default database (or `queue` when the
    /// URI names none).
    pub async fn connect(
        uri: &str,
        cert_file: Option<String>,
        collection: &str,
    ) -> Result<Self, mongodb::error::Error> {
        let database = connect_database(uri, cert_file).await?;
        Ok(Self::new(&database, collection))
    }
}

#[async_trait]
impl JobStore for MongoJobStore {
    async fn reserve_next(
        &self,
        queue: &str,
        now: DateTime,
    ) -> Result<Option<JobRecord>, QueueError> {
        let filter = doc! {
            "queue": queue,
            "reserved": { "$ne": true },
            "available_at": { "$lte": now },
        };
        let update = doc! {
            "$set": { "reserved": true, "reserved_at": now },
            "$inc": { "attempts": 1 },
        };
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "available_at": 1 })
            .return_document(ReturnDocument::After)
            .build();

        let record = self
            .collection
            .find_one_and_update(filter, update, options)
            .await
            .context("Failed to check out a job from the queue")?;

        Ok(record)
    }

    async fn expired_leases(
        &self,
        queue: &str,
        expired_before: DateTime,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let filter = doc! {
            "queue": queue,
            "reserved_at": { "$ne": None::<DateTime>, "$lte": expired_before },
        };

        let mut cursor = self
            .collection
            .find(filter, None)
            .await
            .context("Failed to scan for expired leases")?;

        let mut expired = Vec::new();
        while cursor
            .advance()
            .await
            .context("Failed to scan for expired leases")?
        {
            expired.push(
                cursor
                    .deserialize_current()
                    .context("Failed to decode an expired job record")?,
            );
        }

        Ok(expired)
    }

    async fn release(
        &self,
        id: ObjectId,
        attempts: i64,
        expected_reserved_at: Option<DateTime>,
    ) -> Result<(), QueueError> {
        let mut filter = doc! { "_id": id };
        if let Some(expected) = expected_reserved_at {
            filter.insert("reserved_at", expected);
        }

        self.collection
            .update_one(
                filter,
                doc! {
                    "$set": {
                        "reserved": false,
                        "reserved_at": None::<DateTime>,
                        "attempts": attempts,
                    },
                },
                None,
            )
            .await
            .context("Failed to release job reservation")?;

        Ok(())
    }

    async fn delete(&self, id: ObjectId) -> Result<(), QueueError> {
        let result = self
            .collection
            .delete_one(doc! { "_id": id }, None)
            .await
            .context("Failed to remove job from the queue")?;

        if result.deleted_count == 0 {
            Err(QueueError::JobNotFound(id))
        } else {
            Ok(())
        }
    }

    async fn insert(&self, record: JobRecord) -> Result<ObjectId, QueueError> {
        let id = record.id;
        self.collection
            .insert_one(record, None)
            .await
            .context("Failed to add job to the queue")?;
        Ok(id)
    }
}

/// Failed-job recorder backed by a MongoDB collection.
#[derive(Clone)]
pub struct MongoFailedJobStore {
    collection: Collection<FailedJobRecord>,
}

impl MongoFailedJobStore {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
        }
    }
}

#[async_trait]
impl FailedJobStore for MongoFailedJobStore {
    async fn record(&self, failed: FailedJobRecord) -> Result<(), QueueError> {
        self.collection
            .insert_one(failed, None)
            .await
            .context("Failed to record failed job")?;
        Ok(())
    }
}

/// Connect a client, optionally trusting a CA certificate file.
pub async fn connect_database(
    uri: &str,
    cert_file: Option<String>,
) -> Result<Database, mongodb::error::Error> {
    let client = new_client(uri, cert_file).await?;
    Ok(client.default_database().unwrap_or(client.database("queue")))
}

async fn new_client(
    uri: &str,
    cert_path: Option<String>,
) -> Result<Client, mongodb::error::Error> {
    match cert_path {
        Some(cert_path) => {
            let conn_str = ConnectionString::parse(uri)?;
            let mut options = ClientOptions::parse_connection_string(conn_str).await?;
            let mut tls_options = TlsOptions::default();
            tls_options.ca_file_path = Some(cert_path.into());
            tls_options.allow_invalid_hostnames = Some(true);
            options.tls = Some(Tls::Enabled(tls_options));
            Client::with_options(options)
        }
        None => Client::with_uri_str(uri).await,
    }
}
