use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config_path = env::var("MBSTF_CONFIG").unwrap_or_else(|_| "/etc/mbstf/mbstf.yaml".to_owned());
    let config = mbstf_service::config::load_config_from_path(std::path::Path::new(&config_path))
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %config_path, "falling back to default configuration");
            mbstf_service::config::load_config_from_str("mbstf: {}\n").expect("default config is valid")
        });

    let bind_addr = config.dist_session_api.bind.clone();
    let state = mbstf_service::AppState::new(config);
    let router = mbstf_service::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind distribution-session API listener");
    info!(addr = %bind_addr, "nmbstf-distsession listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("mbstf shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
