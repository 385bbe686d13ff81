//! # storyloom: image to story
//!
//! `storyloom` turns an uploaded picture into a short story. It is a thin web front over two hosted
//! machine-learning models: an image-to-text model writes a one-line caption for the picture, and a
//! text-to-text model expands that caption into a story using a fixed few-shot prompt.
//!
//! ## Request Flow
//!
//! The page at `/` uploads an image to `POST /api/v1/interactions`. The upload is streamed into a
//! per-request temporary file and an interaction is started for the browser session. A background
//! task then runs the two stages in order, recording progress in the session's interaction:
//!
//! ```text
//! file_received -> captioning -> caption_shown -> storytelling -> story_shown
//! ```
//!
//! The page polls `GET /api/v1/interactions/current` and shows the caption and then the story as
//! they arrive. A fault in either stage ends the interaction in `failed`; uploading another image
//! cancels and replaces whatever the session was doing. Each stage is also exposed on its own as a
//! synchronous endpoint (`POST /api/v1/captions`, `POST /api/v1/stories`).
//!
//! ### Core Components
//!
//! - **[`inference`]**: the hosted model client and the captioning and storytelling stages
//! - **[`pipeline`]**: the two stages wired together, with stage metrics
//! - **[`interactions`]**: per-session interaction records, their state machine and the runner task
//! - **[`uploads`]**: per-request temporary upload files
//! - **[`api`]**: HTTP handlers, request/response models, session extraction
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use storyloom::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     storyloom::install_crypto_provider();
//!
//!     let args = storyloom::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     storyloom::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
pub mod inference;
pub mod interactions;
mod metrics;
mod openapi;
pub mod pipeline;
mod static_assets;
pub mod telemetry;
pub mod uploads;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::{PrometheusMetricLayer, metrics_exporter_prometheus::PrometheusHandle};
use bon::Builder;
pub use config::Config;
use std::sync::{Arc, Once, OnceLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{interactions as interaction_handlers, pages, stages, static_assets as asset_handlers},
    config::SessionsConfig,
    inference::hub::HubClient,
    interactions::InteractionStore,
    openapi::ApiDoc,
    pipeline::Pipeline,
};

/// Room for multipart boundaries and headers on top of `uploads.max_file_size`
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Install the process-wide rustls crypto provider used by the HTTP client. Safe to call more
/// than once.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Fails only if another provider is already installed, which is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .pipeline(Arc::new(pipeline))
///     .interactions(Arc::new(InteractionStore::new()))
///     .shutdown_token(token)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<Pipeline>,
    pub interactions: Arc<InteractionStore>,
    /// Parent of every interaction's cancellation token
    pub shutdown_token: CancellationToken,
}

/// The Prometheus recorder is process-global, so the layer/handle pair is created once.
fn prometheus_pair() -> (PrometheusMetricLayer<'static>, PrometheusHandle) {
    static PAIR: OnceLock<(PrometheusMetricLayer<'static>, PrometheusHandle)> = OnceLock::new();
    PAIR.get_or_init(PrometheusMetricLayer::pair).clone()
}

/// Build the application router.
///
/// - `/` page and `/static/*` assets
/// - `/api/v1/*` JSON API
/// - `/docs` API documentation
/// - `/healthz` liveness probe
/// - `/internal/metrics` when `enable_metrics` is set
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.config.uploads.max_file_size.saturating_add(MULTIPART_OVERHEAD))?;

    let api_routes = Router::new()
        .route(
            "/interactions",
            post(interaction_handlers::create_interaction).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/interactions/current",
            get(interaction_handlers::get_current_interaction).delete(interaction_handlers::cancel_current_interaction),
        )
        .route("/captions", post(stages::create_caption).layer(DefaultBodyLimit::max(upload_limit)))
        .route("/stories", post(stages::create_story));

    let mut router = Router::new()
        .route("/", get(pages::index))
        .route("/static/{*path}", get(asset_handlers::serve_embedded_asset))
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = prometheus_pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background tasks that run alongside the HTTP server. Currently only the idle
/// session sweeper.
///
/// # Graceful Shutdown
///
/// [`shutdown`](BackgroundServices::shutdown) cancels the shared token, which also cancels every
/// running interaction, and waits for the tasks to exit. When dropped, the `drop_guard` cancels
/// the token as well.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(
    interactions: Arc<InteractionStore>,
    sessions: SessionsConfig,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let token = shutdown_token.clone();

    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sessions.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Session sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let evicted = interactions.evict_idle(sessions.idle_timeout);
                    if evicted > 0 {
                        info!(evicted, remaining = interactions.len(), "Evicted idle sessions");
                    }
                }
            }
        }
    });

    BackgroundServices {
        background_tasks: vec![sweeper],
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] builds the model client and the pipeline, and starts the
///    background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown signal resolves, running interactions and background tasks
///    are cancelled and telemetry is flushed
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application talking to the configured inference API
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting storyloom with configuration: {:#?}", config);

        let client = Arc::new(HubClient::new(&config.hub)?);
        let pipeline = Pipeline::with_client(client, &config);
        info!(
            caption_model = pipeline.caption_model(),
            story_model = pipeline.story_model(),
            "Models configured"
        );

        Self::with_pipeline(config, pipeline)
    }

    /// Create an application around an already wired pipeline
    pub fn with_pipeline(config: Config, pipeline: Pipeline) -> anyhow::Result<Self> {
        let shutdown_token = CancellationToken::new();
        let interactions = Arc::new(InteractionStore::new());

        let bg_services = setup_background_services(interactions.clone(), config.sessions.clone(), shutdown_token.clone());

        let app_state = AppState::builder()
            .config(config.clone())
            .pipeline(Arc::new(pipeline))
            .interactions(interactions)
            .shutdown_token(shutdown_token)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "storyloom listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Cancels running interactions too
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
