pub mod documents;

pub use documents::{DocumentListParams, DocumentResponse};
