use crate::error::RegistryError;
use crate::models::{Document, DocumentStatus, NewDocument, Transition};
use crate::services::registry::DocumentRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed registry. Transitions are compare-and-set updates filtered
/// on the expected source status, so concurrent writers across processes
/// cannot both win.
#[derive(Clone)]
pub struct MongoRegistry {
    client: MongoClient,
    db: Database,
}

impl MongoRegistry {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RegistryError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            RegistryError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), RegistryError> {
        tracing::info!("Creating MongoDB indexes for conversion-service");

        let documents = self.documents();

        // Reaper and recovery scans
        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1, "updated_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_updated_lookup".to_string())
                    .build(),
            )
            .build();

        documents.create_index(status_index, None).await.map_err(|e| {
            tracing::error!("Failed to create status index on documents collection: {}", e);
            RegistryError::from(e)
        })?;
        tracing::info!("Created index on documents.(status, updated_at)");

        let created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("created_at_desc".to_string())
                    .build(),
            )
            .build();

        documents.create_index(created_index, None).await.map_err(|e| {
            tracing::error!("Failed to create created_at index on documents collection: {}", e);
            RegistryError::from(e)
        })?;
        tracing::info!("Created index on documents.created_at");

        Ok(())
    }

    pub fn documents(&self) -> Collection<Document> {
        self.db.collection("documents")
    }

    async fn find(
        &self,
        filter: mongodb::bson::Document,
        sort: mongodb::bson::Document,
    ) -> Result<Vec<Document>, RegistryError> {
        let options = FindOptions::builder().sort(sort).build();
        let cursor = self.documents().find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn optional_string(value: &Option<String>) -> Bson {
    value.clone().map(Bson::String).unwrap_or(Bson::Null)
}

#[async_trait]
impl DocumentRegistry for MongoRegistry {
    async fn create(&self, new: NewDocument) -> Result<Document, RegistryError> {
        let document = Document::new(new, Utc::now());
        match self.documents().insert_one(&document, None).await {
            Ok(_) => Ok(document),
            Err(e) if is_duplicate_key(&e) => Err(RegistryError::Duplicate(document.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Document, RegistryError> {
        self.documents()
            .find_one(doc! { "_id": id }, None)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Document>, RegistryError> {
        self.find(doc! {}, doc! { "created_at": -1, "_id": -1 }).await
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Document, RegistryError> {
        let current = self.get(id).await?;
        let from = transition.from_status();

        let mut next = current.clone();
        next.apply(transition, Utc::now())
            .map_err(|source| RegistryError::InvalidTransition {
                id: id.to_string(),
                source,
            })?;

        let update = doc! {
            "$set": {
                "status": next.status.as_str(),
                "output_filename": optional_string(&next.output_filename),
                "error_message": optional_string(&next.error_message),
                "updated_at": mongodb::bson::DateTime::from_chrono(next.updated_at),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .documents()
            .find_one_and_update(doc! { "_id": id, "status": from.as_str() }, update, options)
            .await?;

        match updated {
            Some(document) => Ok(document),
            None => {
                // Another writer moved the document first.
                let latest = self.get(id).await?;
                Err(RegistryError::InvalidTransition {
                    id: id.to_string(),
                    source: crate::models::InvalidTransition {
                        from: latest.status,
                        to: next.status,
                    },
                })
            }
        }
    }

    async fn stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>, RegistryError> {
        self.find(
            doc! {
                "status": DocumentStatus::Processing.as_str(),
                "updated_at": { "$lt": mongodb::bson::DateTime::from_chrono(older_than) },
            },
            doc! { "updated_at": 1 },
        )
        .await
    }

    async fn pending(&self) -> Result<Vec<Document>, RegistryError> {
        self.find(
            doc! { "status": DocumentStatus::Pending.as_str() },
            doc! { "created_at": 1, "_id": 1 },
        )
        .await
    }

    async fn health_check(&self) -> Result<(), RegistryError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                RegistryError::from(e)
            })?;
        Ok(())
    }
}
