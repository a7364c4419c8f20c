use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tripwire_gateway::{AppState, HttpUpstream, Settings, router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tripwire=info,tripwire_gateway=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::parse();
    let breaker = Arc::new(settings.breaker()?);
    let upstream = Arc::new(HttpUpstream::new(
        settings.upstream_url.clone(),
        settings.request_timeout()?,
    )?);

    let app = router(AppState::new(breaker, upstream.clone()));
    let listener = tokio::net::TcpListener::bind(settings.bind).await?;

    info!(
        bind = %listener.local_addr()?,
        upstream = upstream.url(),
        failure_threshold = settings.failure_threshold,
        recovery_timeout_secs = settings.recovery_timeout_secs,
        "gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
