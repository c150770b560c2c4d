pub mod documents;
pub mod health;

pub use documents::{download_document, get_document, list_documents, upload_document};
pub use health::{health_check, metrics_endpoint, readiness_check};
