// Main entry point for the hydration backend

use hydration_backend::{
    core::{config::StoreBackend, Config},
    http::{router, AppState},
    orchestration::{DrinkAnalyzer, ReminderDispatcher},
    services::{ExpoPushClient, GoogleVisionClient, OpenAiInterpreter},
    storage::{MemoryStore, Store, SupabaseStore},
    utils::Metrics,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "hydration_backend={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== HYDRATION BACKEND ===");
    info!(
        "Config: store={:?} trial={} paid={} cache_ttl={}d window={}m",
        config.store.backend,
        config.analysis.trial_daily_scans,
        config.analysis.paid_daily_scans,
        config.analysis.cache_ttl_days,
        config.reminders.window_minutes
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Select the store backend. The memory store is kept separately so its
    // snapshot can be written on shutdown.
    let (store, memory_store): (Arc<dyn Store>, Option<MemoryStore>) = match config.store.backend {
        StoreBackend::Memory => {
            let memory = match &config.store.snapshot_path {
                Some(path) => MemoryStore::open(config.store.cache_capacity, config.cache_ttl(), path).await?,
                None => MemoryStore::new(config.store.cache_capacity, config.cache_ttl()),
            };
            let store: Arc<dyn Store> = Arc::new(memory.clone());
            (store, Some(memory))
        }
        StoreBackend::Supabase => {
            // Presence checked by Config::validate
            let url = config.store.supabase_url.as_deref().unwrap_or_default();
            let key = config.store.supabase_service_key.as_deref().unwrap_or_default();
            let store: Arc<dyn Store> = Arc::new(SupabaseStore::new(url, key, config.http_timeout)?);
            (store, None)
        }
    };

    info!("Initializing remote clients...");
    let vision = Arc::new(GoogleVisionClient::new(&config.vision, config.http_timeout, Some(metrics.clone()))?);
    let interpreter = Arc::new(OpenAiInterpreter::new(&config.llm, config.http_timeout, Some(metrics.clone()))?);
    let push = Arc::new(ExpoPushClient::new(&config.push, config.http_timeout, Some(metrics.clone()))?);

    let analyzer = Arc::new(DrinkAnalyzer::new(
        store.clone(),
        vision,
        interpreter,
        &config.analysis,
        metrics.clone(),
    ));
    let dispatcher = Arc::new(ReminderDispatcher::new(store, push, &config.reminders, metrics.clone()));

    let app = router(AppState {
        analyzer,
        dispatcher,
        metrics,
    });

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                        - Root endpoint");
    info!("  GET  /health                  - Health check");
    info!("  GET  /metrics                 - Prometheus metrics");
    info!("  GET  /stats                   - Detailed statistics");
    info!("  POST /analyze-drink-image     - Analyse a drink photo");
    info!("  POST /send-hydration-reminder - Run one reminder pass");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    if let Some(memory) = memory_store {
        if let Err(e) = memory.save().await {
            error!("Failed to save store snapshot: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
}
