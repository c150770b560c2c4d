use crate::config::{ConversionConfig, CorsConfig, RegistryBackend};
use crate::converters::ConverterRegistry;
use crate::handlers;
use crate::services::{
    DispatchQueue, DocumentRegistry, InMemoryRegistry, LocalStorage, MongoRegistry, Storage,
};
use crate::workers::{Reaper, WorkerOrchestrator};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: ConversionConfig,
    pub registry: Arc<dyn DocumentRegistry>,
    pub storage: Arc<dyn Storage>,
    pub converters: Arc<ConverterRegistry>,
    pub queue: Arc<DispatchQueue>,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
    orchestrator: WorkerOrchestrator,
    reaper: Reaper,
    shutdown_token: CancellationToken,
}

impl Application {
    pub async fn build(config: ConversionConfig) -> Result<Self, AppError> {
        let registry = build_registry(&config).await?;

        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(&config.storage.local_path)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize local storage at {}: {}",
                        config.storage.local_path,
                        e
                    );
                    AppError::from(e)
                })?,
        );

        let state = AppState {
            config: config.clone(),
            registry,
            storage,
            converters: Arc::new(ConverterRegistry::new()),
            queue: Arc::new(DispatchQueue::new(config.worker.queue_size)),
        };

        let shutdown_token = CancellationToken::new();
        let orchestrator = WorkerOrchestrator::new(
            config.worker.clone(),
            state.registry.clone(),
            state.storage.clone(),
            state.converters.clone(),
            state.queue.clone(),
            shutdown_token.child_token(),
        );
        let reaper = Reaper::new(
            &config.reaper,
            state.registry.clone(),
            shutdown_token.child_token(),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            router: router(state.clone()),
            state,
            orchestrator,
            reaper,
            shutdown_token,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling this token stops the server, the workers and the reaper.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let token = self.shutdown_token.clone();
        self.run_until(async move { token.cancelled().await }).await
    }

    /// Serve until `signal` resolves, then drain in-flight requests and stop
    /// the background tasks.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Application {
            listener,
            router,
            orchestrator,
            reaper,
            shutdown_token,
            ..
        } = self;

        let workers = orchestrator.start();
        let orchestrator = Arc::new(orchestrator);

        let recovery = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = recovery.recover_pending().await {
                tracing::error!(error = %e, "Failed to re-enqueue pending documents");
            }
        });
        let reaper_task = tokio::spawn(reaper.run());

        let server_token = shutdown_token.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {},
                    _ = server_token.cancelled() => {},
                }
                tracing::info!("Shutdown signal received");
            })
            .await;

        shutdown_token.cancel();
        orchestrator.shutdown();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = reaper_task.await;
        tracing::info!("Application stopped");

        result
    }
}

async fn build_registry(config: &ConversionConfig) -> Result<Arc<dyn DocumentRegistry>, AppError> {
    match config.registry.backend {
        RegistryBackend::Memory => {
            tracing::info!("Using in-memory document registry");
            Ok(Arc::new(InMemoryRegistry::new()))
        }
        RegistryBackend::Mongodb => {
            let uri = config.registry.mongodb_uri.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("MONGODB_URI is required"))
            })?;
            let registry = MongoRegistry::connect(uri, &config.registry.mongodb_database).await?;
            registry.initialize_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                e
            })?;
            Ok(Arc::new(registry))
        }
    }
}

/// HTTP surface. Public so tests can drive it without a socket.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .config
        .upload
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let documents = Router::new()
        .route(
            "/documents",
            get(handlers::list_documents).post(handlers::upload_document),
        )
        .route("/documents/:id", get(handlers::get_document))
        .route("/documents/:id/download", get(handlers::download_document))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api/v1", documents)
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors))
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if config.allows_any() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
