use crate::config::Config;
use crate::source::{create_resolver, SourceResolver};
use crate::tools::resolve_ffmpeg;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use scenestream_transcode::{
    reconcile_orphans, EncoderSupervisor, FfmpegSupervisor, Janitor, ManifestBuilder,
    SeekCoordinator, SegmentServer, SessionStore, TranscodeSettings,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;
pub mod routes_api;
pub mod routes_sessions;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub manifests: ManifestBuilder,
    pub segments: SegmentServer,
    pub seek: SeekCoordinator,
    /// Scene id to source file lookup
    pub resolver: Arc<dyn SourceResolver>,
}

impl AppContext {
    pub fn new(
        config: Config,
        settings: TranscodeSettings,
        supervisor: Arc<dyn EncoderSupervisor>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(supervisor, Arc::new(settings)));
        Self {
            config: Arc::new(config),
            manifests: ManifestBuilder::new(store.clone()),
            segments: SegmentServer::new(store.clone()),
            seek: SeekCoordinator::new(store.clone()),
            store,
            resolver,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes(&ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    // The gate also runs with auth disabled so handlers always see a user.
    routes_api::api_routes()
        .merge(routes_sessions::session_routes())
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::api_auth_middleware,
        ))
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server and its background tasks, returning after a
/// graceful shutdown has terminated every session.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let settings = config
        .transcode
        .to_settings()
        .context("Invalid transcode settings")?;

    let ffmpeg = match resolve_ffmpeg(config.transcode.ffmpeg_path.as_deref()) {
        Some(path) => {
            tracing::info!("Using ffmpeg at {:?}", path);
            path
        }
        None => {
            tracing::warn!("ffmpeg not found; every encoder launch will fail");
            PathBuf::from("ffmpeg")
        }
    };

    std::fs::create_dir_all(&settings.work_dir)
        .with_context(|| format!("Failed to create work dir {:?}", settings.work_dir))?;
    let work_dir = settings.work_dir.clone();
    tokio::task::spawn_blocking(move || reconcile_orphans(&work_dir))
        .await
        .context("Orphan reconciliation panicked")??;

    let settings_arc = Arc::new(settings.clone());
    let supervisor: Arc<dyn EncoderSupervisor> =
        Arc::new(FfmpegSupervisor::new(ffmpeg, settings_arc));
    let resolver: Arc<dyn SourceResolver> = Arc::from(create_resolver(&config.source));

    let janitor_config = config.janitor.clone();
    let ctx = AppContext::new(config, settings, supervisor, resolver);
    let store = ctx.store.clone();

    let cancel = CancellationToken::new();
    let event_loop = store.spawn_event_loop(cancel.clone());
    let janitor = Janitor::new(
        store.clone(),
        Duration::from_secs(janitor_config.interval_secs),
        Duration::from_secs(janitor_config.idle_threshold_secs),
    )
    .spawn(cancel.clone());

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    let _ = janitor.await;
    let _ = event_loop.await;
    store.shutdown().await;

    serve_result?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
