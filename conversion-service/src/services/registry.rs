use crate::error::RegistryError;
use crate::models::{Document, DocumentStatus, NewDocument, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of truth for document status.
///
/// `transition` is the only mutation after `create`; implementations must make
/// it atomic per document so readers never see a half-applied change.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    async fn create(&self, new: NewDocument) -> Result<Document, RegistryError>;

    async fn get(&self, id: &str) -> Result<Document, RegistryError>;

    /// All documents, most recent first.
    async fn list(&self) -> Result<Vec<Document>, RegistryError>;

    async fn transition(&self, id: &str, transition: Transition)
        -> Result<Document, RegistryError>;

    /// PROCESSING documents last updated before `older_than`.
    async fn stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>, RegistryError>;

    /// PENDING documents, oldest first.
    async fn pending(&self) -> Result<Vec<Document>, RegistryError>;

    async fn health_check(&self) -> Result<(), RegistryError>;
}

struct Entry_ {
    seq: u64,
    document: Document,
}

/// Process-local registry. Each document sits behind its own shard lock, so
/// transitions on one id are serialized without blocking the others.
#[derive(Default)]
pub struct InMemoryRegistry {
    documents: DashMap<String, Entry_>,
    next_seq: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<(u64, Document)> {
        self.documents
            .iter()
            .map(|e| (e.seq, e.document.clone()))
            .collect()
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn create(&self, new: NewDocument) -> Result<Document, RegistryError> {
        match self.documents.entry(new.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(new.id)),
            Entry::Vacant(slot) => {
                let document = Document::new(new, Utc::now());
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(Entry_ {
                    seq,
                    document: document.clone(),
                });
                Ok(document)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Document, RegistryError> {
        self.documents
            .get(id)
            .map(|e| e.document.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Document>, RegistryError> {
        let mut entries = self.snapshot();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, d)| d).collect())
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Document, RegistryError> {
        let mut entry = self
            .documents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let mut updated = entry.document.clone();
        updated
            .apply(transition, Utc::now())
            .map_err(|source| RegistryError::InvalidTransition {
                id: id.to_string(),
                source,
            })?;

        entry.document = updated.clone();
        Ok(updated)
    }

    async fn stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>, RegistryError> {
        Ok(self
            .snapshot()
            .into_iter()
            .map(|(_, d)| d)
            .filter(|d| d.status == DocumentStatus::Processing && d.updated_at < older_than)
            .collect())
    }

    async fn pending(&self) -> Result<Vec<Document>, RegistryError> {
        let mut entries: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|(_, d)| d.status == DocumentStatus::Pending)
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, d)| d).collect())
    }

    async fn health_check(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}
