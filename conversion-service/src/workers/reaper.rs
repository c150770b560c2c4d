use crate::config::ReaperConfig;
use crate::error::RegistryError;
use crate::models::Transition;
use crate::services::DocumentRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails documents stuck in PROCESSING, e.g. after a worker crash.
pub struct Reaper {
    registry: Arc<dyn DocumentRegistry>,
    max_processing: Duration,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Reaper {
    pub fn new(
        config: &ReaperConfig,
        registry: Arc<dyn DocumentRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            max_processing: config.max_processing(),
            interval: config.interval(),
            shutdown,
        }
    }

    /// One pass: fail every document that has been PROCESSING too long.
    /// Returns how many were failed.
    pub async fn sweep(&self) -> Result<usize, RegistryError> {
        // A threshold reaching before the representable range matches nothing.
        let Some(cutoff) = chrono::Duration::from_std(self.max_processing)
            .ok()
            .and_then(|max_age| Utc::now().checked_sub_signed(max_age))
        else {
            return Ok(0);
        };
        let mut reaped = 0;

        for document in self.registry.stuck(cutoff).await? {
            let transition = Transition::Fail {
                error_message: format!(
                    "Processing timed out after {} seconds",
                    self.max_processing.as_secs()
                ),
            };

            match self.registry.transition(&document.id, transition).await {
                Ok(_) => {
                    reaped += 1;
                    metrics::counter!("documents_reaped_total").increment(1);
                    tracing::warn!(
                        document_id = %document.id,
                        processing_since = %document.updated_at,
                        "Reaped stuck document"
                    );
                }
                // The worker finished in the meantime.
                Err(RegistryError::InvalidTransition { .. }) => {}
                Err(e) => {
                    tracing::error!(document_id = %document.id, error = %e, "Failed to reap document");
                }
            }
        }

        Ok(reaped)
    }

    pub async fn run(self) {
        tracing::info!(
            max_processing_secs = self.max_processing.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting reaper"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Reaper sweep failed");
                    }
                }
            }
        }

        tracing::info!("Reaper stopped");
    }
}
