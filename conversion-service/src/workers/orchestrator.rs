use crate::config::WorkerConfig;
use crate::converters::{Converter, ConverterRegistry, CONVERTER_VERSION};
use crate::error::{ConversionError, ProcessingError, RegistryError, StorageError};
use crate::models::{Document, Transition};
use crate::services::storage::{output_key, Storage};
use crate::services::{DispatchQueue, DocumentRegistry};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the worker pool. Workers pull ids from the shared [`DispatchQueue`];
/// there is no central distributor, so a slow job never holds up the others.
pub struct WorkerOrchestrator {
    config: WorkerConfig,
    registry: Arc<dyn DocumentRegistry>,
    storage: Arc<dyn Storage>,
    converters: Arc<ConverterRegistry>,
    queue: Arc<DispatchQueue>,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn DocumentRegistry>,
        storage: Arc<dyn Storage>,
        converters: Arc<ConverterRegistry>,
        queue: Arc<DispatchQueue>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            storage,
            converters,
            queue,
            shutdown_token,
        }
    }

    /// Spawn the worker loops. Returns no handles when workers are disabled.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Worker pool disabled by configuration");
            return Vec::new();
        }

        tracing::info!(
            worker_count = self.config.worker_count,
            converter_version = CONVERTER_VERSION,
            "Starting worker pool"
        );

        (0..self.config.worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    registry: self.registry.clone(),
                    storage: self.storage.clone(),
                    converters: self.converters.clone(),
                    queue: self.queue.clone(),
                    conversion_timeout: self.config.conversion_timeout(),
                    storage_retry_attempts: self.config.storage_retry_attempts.max(1),
                    shutdown: self.shutdown_token.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }

    /// Re-enqueue documents left PENDING by a previous run, oldest first.
    ///
    /// Waits for queue capacity, so call it after the workers are running.
    pub async fn recover_pending(&self) -> Result<usize, RegistryError> {
        let pending = self.registry.pending().await?;
        let mut recovered = 0;

        for document in pending {
            match self.queue.enqueue(&document.id).await {
                Ok(()) => recovered += 1,
                Err(crate::error::QueueError::AlreadyQueued(_)) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped re-enqueueing pending documents");
                    break;
                }
            }
        }

        if recovered > 0 {
            tracing::info!(count = recovered, "Re-enqueued pending documents");
        }
        Ok(recovered)
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown_token.cancel();
        self.queue.close();
    }
}

#[derive(Clone)]
struct Worker {
    id: usize,
    registry: Arc<dyn DocumentRegistry>,
    storage: Arc<dyn Storage>,
    converters: Arc<ConverterRegistry>,
    queue: Arc<DispatchQueue>,
    conversion_timeout: Duration,
    storage_retry_attempts: u32,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let document_id = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.queue.dequeue() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            self.process_job(&document_id).await;
            self.queue.complete(&document_id);
        }

        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    async fn process_job(&self, document_id: &str) {
        let document = match self.registry.transition(document_id, Transition::Claim).await {
            Ok(document) => document,
            Err(e @ (RegistryError::InvalidTransition { .. } | RegistryError::NotFound(_))) => {
                tracing::warn!(
                    worker_id = self.id,
                    document_id = %document_id,
                    error = %e,
                    "Skipping job that could not be claimed"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    worker_id = self.id,
                    document_id = %document_id,
                    error = %e,
                    "Failed to claim document"
                );
                return;
            }
        };

        let start = Instant::now();
        tracing::info!(
            worker_id = self.id,
            document_id = %document_id,
            mime_type = %document.mime_type,
            "Processing job started"
        );

        match self.convert(&document).await {
            Ok(output) => self.complete(&document, output, start).await,
            Err(e) => self.fail(&document, e).await,
        }
    }

    async fn convert(&self, document: &Document) -> Result<String, ProcessingError> {
        let converter = self
            .converters
            .for_filename(&document.stored_filename)
            .ok_or_else(|| ConversionError::Unsupported(document.original_filename.clone()))?;

        let source = self
            .with_storage_retry("read source", || self.storage.get(&document.stored_filename))
            .await?;

        let output = self.run_converter(converter.clone(), source).await?;

        let key = output_key(&document.id, converter.output_extension());
        self.with_storage_retry("write output", || self.storage.put(&key, output.clone()))
            .await?;

        Ok(key)
    }

    /// Conversion is CPU-bound; keep it off the async workers.
    async fn run_converter(
        &self,
        converter: Arc<dyn Converter>,
        source: Vec<u8>,
    ) -> Result<Vec<u8>, ProcessingError> {
        let task = tokio::task::spawn_blocking(move || converter.convert(&source));

        match tokio::time::timeout(self.conversion_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_error)) => {
                tracing::error!(worker_id = self.id, error = %join_error, "Conversion task aborted");
                Err(ProcessingError::Aborted)
            }
            Err(_) => Err(ConversionError::TimedOut(self.conversion_timeout.as_secs()).into()),
        }
    }

    async fn complete(&self, document: &Document, output_filename: String, start: Instant) {
        let transition = Transition::Complete {
            output_filename: output_filename.clone(),
        };

        match self.registry.transition(&document.id, transition).await {
            Ok(_) => {
                metrics::counter!("document_conversion_total", "outcome" => "completed")
                    .increment(1);
                metrics::histogram!("document_conversion_duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::info!(
                    worker_id = self.id,
                    document_id = %document.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Processing succeeded"
                );
            }
            Err(e) => {
                // Lost the record (usually to the reaper); the output is an orphan.
                tracing::warn!(
                    worker_id = self.id,
                    document_id = %document.id,
                    error = %e,
                    "Could not mark document completed, discarding output"
                );
                if let Err(e) = self.storage.delete(&output_filename).await {
                    tracing::warn!(key = %output_filename, error = %e, "Failed to delete orphaned output");
                }
            }
        }
    }

    async fn fail(&self, document: &Document, error: ProcessingError) {
        metrics::counter!("document_conversion_total", "outcome" => "failed").increment(1);
        tracing::error!(
            worker_id = self.id,
            document_id = %document.id,
            error = ?error,
            "Processing failed"
        );

        let transition = Transition::Fail {
            error_message: error.user_message(),
        };
        if let Err(e) = self.registry.transition(&document.id, transition).await {
            tracing::error!(
                document_id = %document.id,
                error = %e,
                "Failed to update document with failure status"
            );
        }
    }

    /// Retry transient storage failures with exponential backoff, up to the
    /// configured number of attempts.
    async fn with_storage_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.storage_retry_attempts;
        let mut attempt = 0u32;

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if e.is_transient() && current < max_attempts {
                        tracing::warn!(
                            operation = operation,
                            attempt = current,
                            error = %e,
                            "Storage operation failed, retrying"
                        );
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}
