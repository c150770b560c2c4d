use crate::converters::{extension_of, XLSX_CONTENT_TYPE};
use crate::dtos::{DocumentListParams, DocumentResponse};
use crate::error::QueueError;
use crate::models::{Document, DocumentStatus, NewDocument, Transition};
use crate::services::upload_key;
use crate::startup::AppState;
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

const FILE_FIELD: &str = "file";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(anyhow::anyhow!("File exceeds the maximum upload size"))
    } else {
        AppError::BadRequest(anyhow::anyhow!("Invalid multipart body: {}", err.body_text()))
    }
}

pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }

        let document = accept_upload(&state, field).await?;

        enqueue_upload(&state, &document.id).await?;

        metrics::counter!("document_uploads_total").increment(1);
        tracing::info!(document_id = %document.id, "Document upload completed successfully");

        return Ok((StatusCode::CREATED, Json(DocumentResponse::from(document))));
    }

    Err(AppError::BadRequest(anyhow::anyhow!("No file uploaded")))
}

/// Validate, store and register one uploaded file.
async fn accept_upload(state: &AppState, mut field: Field<'_>) -> Result<Document, AppError> {
    let original_filename = field
        .file_name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("No filename provided")))?;

    let upload = &state.config.upload;
    let extension = extension_of(&original_filename)
        .filter(|ext| upload.is_allowed(ext))
        .ok_or_else(|| {
            AppError::UnsupportedMediaType(anyhow::anyhow!(
                "Unsupported file type. Allowed: {}",
                upload.allowed_extensions.join(", ")
            ))
        })?;
    let converter = state.converters.find_by_extension(&extension).ok_or_else(|| {
        AppError::UnsupportedMediaType(anyhow::anyhow!("No converter for .{} files", extension))
    })?;

    let mime_type = field
        .content_type()
        .filter(|ct| *ct != FALLBACK_MIME_TYPE)
        .or_else(|| converter.source_mime_types().first().copied())
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string();

    let max_bytes = upload.max_bytes;
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > max_bytes {
            return Err(AppError::PayloadTooLarge(anyhow::anyhow!(
                "File exceeds the maximum upload size of {} bytes",
                max_bytes
            )));
        }
        data.extend_from_slice(&chunk);
    }

    if data.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Uploaded file is empty")));
    }

    let id = Uuid::new_v4().to_string();
    let stored_filename = upload_key(&id, &extension);
    let file_size = data.len() as u64;

    tracing::info!(
        document_id = %id,
        filename = %original_filename,
        size = file_size,
        "Document upload started"
    );

    state.storage.put(&stored_filename, data).await.map_err(|e| {
        tracing::error!(document_id = %id, error = %e, "Failed to store upload");
        e
    })?;

    let created = state
        .registry
        .create(NewDocument {
            id: id.clone(),
            original_filename,
            stored_filename: stored_filename.clone(),
            mime_type,
            file_size,
        })
        .await;

    match created {
        Ok(document) => Ok(document),
        Err(e) => {
            tracing::error!(document_id = %id, error = %e, "Failed to register document");
            if let Err(cleanup) = state.storage.delete(&stored_filename).await {
                tracing::warn!(key = %stored_filename, error = %cleanup, "Failed to remove orphaned upload");
            }
            Err(e.into())
        }
    }
}

/// Queue a fresh upload. Startup recovery may have queued it first, which
/// counts as success.
async fn enqueue_upload(state: &AppState, document_id: &str) -> Result<(), AppError> {
    match state.queue.try_enqueue(document_id) {
        Ok(()) | Err(QueueError::AlreadyQueued(_)) => Ok(()),
        Err(e) => {
            reject_unqueued(state, document_id, &e).await;
            Err(e.into())
        }
    }
}

/// A record that never reached the queue must not sit in PENDING forever.
async fn reject_unqueued(state: &AppState, document_id: &str, cause: &QueueError) {
    let message = match cause {
        QueueError::Closed => "Service is shutting down, document was not queued",
        _ => "Service busy, document was not queued",
    };
    tracing::warn!(document_id = %document_id, error = %cause, "Document could not be queued");

    let fail = Transition::Fail {
        error_message: message.to_string(),
    };
    let result = match state.registry.transition(document_id, Transition::Claim).await {
        Ok(_) => state.registry.transition(document_id, fail).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!(document_id = %document_id, error = %e, "Failed to mark unqueued document failed");
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListParams>,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let documents = state.registry.list().await?;
    Ok(Json(
        documents
            .into_iter()
            .skip(params.skip())
            .take(params.limit())
            .map(DocumentResponse::from)
            .collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.registry.get(&document_id).await?;
    Ok(Json(DocumentResponse::from(document)))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.registry.get(&document_id).await?;

    if document.status != DocumentStatus::Completed {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Document is not ready for download (status: {})",
            document.status
        )));
    }

    let output_key = document.output_filename.as_deref().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Completed document {} has no output",
            document.id
        ))
    })?;

    let data = state.storage.get(output_key).await.map_err(|e| {
        tracing::error!(
            document_id = %document_id,
            storage_key = %output_key,
            error = %e,
            "Failed to read converted output"
        );
        AppError::StorageError(anyhow::Error::new(e))
    })?;

    let content_type = state
        .converters
        .for_filename(&document.stored_filename)
        .map(|c| c.output_content_type())
        .unwrap_or(XLSX_CONTENT_TYPE);
    let extension = extension_of(output_key).unwrap_or_else(|| "xlsx".to_string());
    let filename = format!("{}.{}", download_stem(&document.original_filename), extension);

    tracing::info!(
        document_id = %document_id,
        size = data.len(),
        "Document download completed"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&filename)),
        ],
        data,
    ))
}

/// File stem of an untrusted client filename, safe for a header value.
pub fn download_stem(original_filename: &str) -> String {
    let name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '"' | '\\' | ';') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();

    let mut encoded = String::new();
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::converters::ConverterRegistry;
    use crate::services::{DispatchQueue, InMemoryRegistry, LocalStorage};
    use std::sync::Arc;

    async fn state(queue_size: usize) -> (AppState, String) {
        let root = format!("target/test-handlers-{}", Uuid::new_v4());
        let mut config = ConversionConfig::load().unwrap();
        config.storage.local_path = root.clone();
        let state = AppState {
            config,
            registry: Arc::new(InMemoryRegistry::new()),
            storage: Arc::new(LocalStorage::new(&root).await.unwrap()),
            converters: Arc::new(ConverterRegistry::new()),
            queue: Arc::new(DispatchQueue::new(queue_size)),
        };
        (state, root)
    }

    async fn register(state: &AppState, id: &str) {
        state
            .registry
            .create(NewDocument {
                id: id.to_string(),
                original_filename: format!("{}.docx", id),
                stored_filename: upload_key(id, "docx"),
                mime_type: "application/octet-stream".to_string(),
                file_size: 1,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_already_queued_by_recovery_is_accepted() {
        let (state, root) = state(4).await;
        register(&state, "fresh").await;
        state.queue.try_enqueue("fresh").unwrap();

        enqueue_upload(&state, "fresh").await.unwrap();

        let document = state.registry.get("fresh").await.unwrap();
        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(state.queue.depth(), 1);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn upload_into_full_queue_is_failed_and_rejected() {
        let (state, root) = state(1).await;
        register(&state, "first").await;
        register(&state, "second").await;
        enqueue_upload(&state, "first").await.unwrap();

        let err = enqueue_upload(&state, "second").await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let document = state.registry.get("second").await.unwrap();
        assert_eq!(document.status, DocumentStatus::Failed);
        assert_eq!(
            document.error_message.as_deref(),
            Some("Service busy, document was not queued")
        );
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[test]
    fn download_stem_strips_paths_and_extension() {
        assert_eq!(download_stem("report.docx"), "report");
        assert_eq!(download_stem("../../etc/passwd.docx"), "passwd");
        assert_eq!(download_stem(r"C:\temp\Q1 plan.v2.docx"), "Q1 plan.v2");
        assert_eq!(download_stem("quote\"and;semi.docx"), "quote_and_semi");
        assert_eq!(download_stem("line\r\nbreak.docx"), "line__break");
        assert_eq!(download_stem(".docx"), ".docx");
        assert_eq!(download_stem("..."), "document");
        assert_eq!(download_stem(""), "document");
    }

    #[test]
    fn disposition_has_ascii_fallback_and_utf8_name() {
        assert_eq!(
            content_disposition("report.xlsx"),
            "attachment; filename=\"report.xlsx\"; filename*=UTF-8''report.xlsx"
        );
        assert_eq!(
            content_disposition("résumé 1.xlsx"),
            "attachment; filename=\"r_sum_ 1.xlsx\"; filename*=UTF-8''r%C3%A9sum%C3%A9%201.xlsx"
        );
    }
}
