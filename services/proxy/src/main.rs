// wfdbg-proxy: workflow-aware debugger proxy.
//
// Runs two listeners: the debug-client proxy entry on port 60000 and
// the history/breakpoint coordination HTTP server on port 54578.  Each
// accepted debug client gets an independent proxied session against
// the stepping backend on port 2345.

use proxy::config::ProxyConfig;
use proxy::coordination::CoordinationServer;
use proxy::session;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(ProxyConfig::from_env());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %cfg.listen_addr,
        backend = %cfg.backend_addr,
        coordination = %cfg.coordination_addr,
        workdir = %cfg.working_dir.display(),
        "proxy starting"
    );

    if let Err(e) = CoordinationServer::start(cfg.coordination_addr, &cfg.data_dir).await {
        error!(error = %e, "failed to start coordination server");
        std::process::exit(1);
    }

    let listener = match tokio::net::TcpListener::bind(cfg.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %cfg.listen_addr, error = %e, "failed to bind proxy listener");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.listen_addr, "proxy listening");

    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((client, peer)) => {
                        info!(%peer, "debug client connected");
                        tokio::spawn(session::run_session(client, cfg.clone()));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
            _ = shutdown_signal() => {
                info!("shutting down");
                break;
            }
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT).
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
        () = ctrl_c => {},
        () = terminate => {},
    }
}
