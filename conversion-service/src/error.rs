//! Domain errors for the conversion pipeline and their HTTP mapping.

use crate::models::InvalidTransition;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage I/O failure on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// I/O failures may succeed on retry; missing objects and bad keys will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io { .. })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("document {0} already exists")]
    Duplicate(String),

    #[error("document {id}: {source}")]
    InvalidTransition {
        id: String,
        #[source]
        source: InvalidTransition,
    },

    #[error("registry database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("dispatch queue is full")]
    Full,

    #[error("dispatch queue is closed")]
    Closed,

    #[error("document {0} is already queued")]
    AlreadyQueued(String),
}

/// Problems with the document content itself. Never retried.
///
/// Display strings are shown to clients, so they must not carry paths or
/// parser internals; the underlying cause stays in `source`.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("file is not a valid DOCX archive")]
    NotAnArchive(#[source] zip::result::ZipError),

    #[error("DOCX archive has no main document part")]
    MissingDocumentPart,

    #[error("document content is malformed")]
    MalformedXml(#[source] quick_xml::Error),

    #[error("document has no body")]
    MissingBody,

    #[error("document content exceeds {0} bytes when decompressed")]
    TooLarge(u64),

    #[error("no converter available for {0}")]
    Unsupported(String),

    #[error("failed to build the spreadsheet")]
    Write(#[source] anyhow::Error),

    #[error("conversion did not finish within {0} seconds")]
    TimedOut(u64),
}

/// Everything that can end a conversion attempt in FAILED.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("conversion task aborted")]
    Aborted,
}

impl ProcessingError {
    /// Summary safe to store in `error_message`.
    pub fn user_message(&self) -> String {
        match self {
            ProcessingError::Storage(StorageError::NotFound(_)) => {
                "Uploaded file is no longer available".to_string()
            }
            ProcessingError::Storage(_) => "Failed to access document storage".to_string(),
            ProcessingError::Conversion(e) => format!("Conversion failed: {}", e),
            ProcessingError::Aborted => "Conversion was interrupted".to_string(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => {
                AppError::NotFound(anyhow::anyhow!("Stored file not found"))
            }
            other => AppError::StorageError(anyhow::Error::new(other)),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::NotFound(anyhow::anyhow!("Document not found")),
            RegistryError::Duplicate(_) | RegistryError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            RegistryError::Database(e) => AppError::from(e),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => AppError::ServiceUnavailable(
                "Service busy, please retry later".to_string(),
                Some(5),
            ),
            QueueError::Closed => {
                AppError::ServiceUnavailable("Service is shutting down".to_string(), None)
            }
            QueueError::AlreadyQueued(_) => AppError::Conflict(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn only_io_failures_are_transient() {
        let io = StorageError::Io {
            key: "uploads/a.docx".to_string(),
            source: std::io::Error::other("disk hiccup"),
        };
        assert!(io.is_transient());
        assert!(!StorageError::NotFound("uploads/a.docx".to_string()).is_transient());
        assert!(!StorageError::InvalidKey("../a".to_string()).is_transient());
    }

    #[test]
    fn user_messages_hide_storage_details() {
        let err = ProcessingError::Storage(StorageError::Io {
            key: "uploads/secret-path.docx".to_string(),
            source: std::io::Error::other("/var/lib/storage: permission denied"),
        });
        let message = err.user_message();
        assert!(!message.contains("secret-path"));
        assert!(!message.contains("/var/lib"));
    }

    #[test]
    fn conversion_messages_are_prefixed() {
        let err = ProcessingError::Conversion(ConversionError::MissingDocumentPart);
        assert_eq!(
            err.user_message(),
            "Conversion failed: DOCX archive has no main document part"
        );
    }

    #[test]
    fn registry_errors_map_to_http_codes() {
        let not_found: AppError = RegistryError::NotFound("x".to_string()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let conflict: AppError = RegistryError::Duplicate("x".to_string()).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn full_queue_is_service_unavailable() {
        let err: AppError = QueueError::Full.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
