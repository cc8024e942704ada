use clap::Parser;
use napi::audit::AuditLog;
use napi::config::Args;
use napi::events::CHANNEL_CAPACITY;
use napi::kv::MemoryKv;
use napi::overlay::{InMemoryOverlaySink, LoggingShootdownSink};
use napi::rest::state::AppState;
use napi_core::ValidationContext;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (events_tx, _rx) = tokio::sync::broadcast::channel(CHANNEL_CAPACITY);

    let state = Arc::new(AppState {
        kv: Arc::new(MemoryKv::new()),
        ctx: ValidationContext {
            admin_uuid: args.admin_uuid,
            fabrics_enabled: args.fabrics_enabled,
        },
        underlay_tag: args.underlay_tag.clone(),
        overlay: Arc::new(InMemoryOverlaySink::new()),
        shootdown: Arc::new(LoggingShootdownSink),
        audit: AuditLog::new(),
        events_tx,
    });

    let app = napi::rest::routes::build(state);

    let listener = TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(addr = %args.listen_addr, "napi listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
