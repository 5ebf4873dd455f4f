use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod events_logic;
use events_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config()?;
    logger::setup_logging(&config.log_dir(), env!("CARGO_BIN_NAME"), config.log_level())?;

    // Parent of every session token; cancelling it closes all live streams.
    let shutdown = CancellationToken::new();
    let app_state = state::build_state(&config, shutdown.clone())?;

    let mut server = tokio::spawn(downstream::run(config.clone(), app_state));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
        result = &mut server => {
            shutdown.cancel();
            return result?;
        }
    }

    shutdown.cancel();
    server.await??;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
