use crate::models::{Document, DocumentStatus};
use serde::{Deserialize, Serialize};

/// Wire form of a [`Document`]. Timestamps are RFC 3339 strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentResponse {
    pub id: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub output_filename: Option<String>,
    pub mime_type: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            original_filename: doc.original_filename,
            stored_filename: doc.stored_filename,
            output_filename: doc.output_filename,
            mime_type: doc.mime_type,
            file_size: doc.file_size,
            status: doc.status,
            error_message: doc.error_message,
            created_at: doc.created_at.to_rfc3339(),
            updated_at: doc.updated_at.to_rfc3339(),
        }
    }
}

/// Largest page a client may ask for.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// `?skip=&limit=` on the document list. Without `limit` the whole list is
/// returned.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DocumentListParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl DocumentListParams {
    pub fn skip(&self) -> usize {
        self.skip.unwrap_or(0)
    }

    pub fn limit(&self) -> usize {
        self.limit.map_or(usize::MAX, |limit| limit.min(MAX_PAGE_LIMIT))
    }
}
