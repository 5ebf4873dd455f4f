use crate::events_logic::config::Config;
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use lib_events::http::{self, AppState};
use std::net::SocketAddr;
use std::time::Duration;

/// How long TLS connections get to finish once shutdown starts.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Serves the stream and feed routes until the shared shutdown token fires.
pub async fn run(config: Config, app_state: AppState) -> Result<()> {
    let shutdown = app_state.shutdown.clone();
    let app = http::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    log::info!("Event stream server listening on {}", addr);

    if let (Some(cert_path), Some(key_path)) = (config.tls_cert_path.clone(), config.tls_key_path.clone()) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("Failed to load TLS configuration")?;

        let handle = axum_server::Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown.cancelled().await;
                log::info!("Event stream server shutting down.");
                handle.graceful_shutdown(Some(TLS_DRAIN));
            }
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                log::info!("Event stream server shutting down.");
            })
            .await
            .context("Server failed")?;
    }
    Ok(())
}
