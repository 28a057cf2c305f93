use std::sync::Arc;

use anyhow::Context;
use marketdesk_infra::config::AppConfig;
use marketdesk_infra::workers::PublisherWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    marketdesk_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(marketdesk_api::app::services::build_services(&config).await?);

    let executor = services.spawn_executor(&config);
    if executor.is_none() {
        tracing::info!("push transport configured; tasks arrive on POST /tasks/deliver");
    }
    let publisher = PublisherWorker::spawn(services.publisher.clone(), config.publisher_interval);

    let app = marketdesk_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    publisher.shutdown().await;
    if let Some(executor) = executor {
        executor.shutdown().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
