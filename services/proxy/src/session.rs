//! Per-connection session dispatcher.
//!
//! One session per accepted debug client: guess the wire protocol from
//! the first byte, dial the backend with retry, open the controller's
//! auxiliary RPC connection, then run one forwarder task per direction
//! until either side closes or the hard watchdog fires.  Sessions are
//! fully independent; nothing here is process-wide.

use crate::autostep::AutoStepper;
use crate::config::ProxyConfig;
use crate::counters::SessionCounters;
use crate::intercept::request;
use crate::intercept::response::ResponseInterceptor;
use crate::rpc::AuxRpc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};
use wfdbg_protocol::framing::{FramingError, WireFormat};
use wfdbg_protocol::message::Location;

/// TCP keep-alive period on both session sockets.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Hard upper bound on a session's lifetime.
const SESSION_DEADLINE: Duration = Duration::from_secs(30 * 60);

const DIAL_ATTEMPTS: u32 = 3;
const DIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing: {0}")]
    Framing(#[from] FramingError),
    #[error("interceptor buffer exceeded {} bytes", crate::intercept::MAX_BUFFER_BYTES)]
    BufferOverflow,
    #[error("backend unavailable after {DIAL_ATTEMPTS} attempts")]
    BackendUnavailable,
}

/// Shared per-session state, written and read by the two forwarders.
///
/// Locks are only ever held between I/O operations, never across them.
#[derive(Debug, Default)]
pub struct SessionState {
    /// `id -> command` for requests awaiting their response.
    pub pending: Mutex<HashMap<String, String>>,
    /// `filtered frame index -> original frame index`, rebuilt on each
    /// filtered stack trace.
    pub frame_map: RwLock<HashMap<usize, usize>>,
    /// Last location the backend reported for the current thread.
    pub current_location: RwLock<Option<Location>>,
    pub counters: SessionCounters,
}

/// Run one proxied debug session to completion.
pub async fn run_session(client: TcpStream, cfg: Arc<ProxyConfig>) {
    let peer = client.peer_addr().ok();
    set_keepalive(&client);

    // The first byte decides the wire protocol for the whole session.
    let mut first = [0u8; 1];
    let wire = match client.peek(&mut first).await {
        Ok(0) => {
            info!(?peer, "client closed before first byte");
            return;
        }
        Ok(_) => WireFormat::from_first_byte(first[0]),
        Err(e) => {
            warn!(?peer, error = %e, "peek failed");
            return;
        }
    };
    info!(?peer, ?wire, "session opened");

    let backend = match dial_backend(cfg.backend_addr).await {
        Ok(backend) => backend,
        Err(e) => {
            warn!(?peer, error = %e, "closing client");
            return;
        }
    };
    set_keepalive(&backend);

    let aux = match AuxRpc::connect(cfg.backend_addr).await {
        Ok(aux) => aux,
        Err(e) => {
            warn!(?peer, error = %e, "aux RPC connect failed, closing session");
            return;
        }
    };
    let stepper = AutoStepper::new(aux, cfg.working_dir.clone());

    let state = Arc::new(SessionState::default());
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();
    let (done_tx, mut done_rx) = mpsc::channel::<()>(2);

    let requests = tokio::spawn({
        let state = state.clone();
        let done = done_tx.clone();
        async move {
            let result = request::run(client_read, backend_write, wire, state).await;
            log_forwarder_exit("client->backend", &result);
            let _ = done.send(()).await;
        }
    });

    let interceptor =
        ResponseInterceptor::new(wire, state.clone(), cfg.working_dir.clone(), stepper);
    let responses = tokio::spawn({
        let done = done_tx;
        async move {
            let result = interceptor.run(backend_read, client_write).await;
            log_forwarder_exit("backend->client", &result);
            let _ = done.send(()).await;
        }
    });

    tokio::select! {
        _ = done_rx.recv() => {}
        _ = tokio::time::sleep(SESSION_DEADLINE) => {
            warn!(?peer, "session watchdog expired");
        }
    }

    // Aborting the forwarders drops the socket halves, which closes
    // both connections and unblocks any remaining I/O; the auxiliary
    // RPC client goes down with the response task.
    requests.abort();
    responses.abort();
    info!(?peer, summary = ?state.counters.snapshot(), "session closed");
}

/// Dial the backend debugger with bounded retry.
async fn dial_backend(addr: SocketAddr) -> Result<TcpStream, SessionError> {
    for attempt in 1..=DIAL_ATTEMPTS {
        match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => warn!(attempt, error = %e, "backend dial failed"),
            Err(_) => warn!(attempt, "backend dial timed out"),
        }
        if attempt < DIAL_ATTEMPTS {
            tokio::time::sleep(DIAL_RETRY_DELAY).await;
        }
    }
    Err(SessionError::BackendUnavailable)
}

fn set_keepalive(stream: &TcpStream) {
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    if let Err(e) = socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to set TCP keep-alive");
    }
}

fn log_forwarder_exit(direction: &str, result: &Result<(), SessionError>) {
    match result {
        Ok(()) => info!(direction, "peer closed"),
        Err(SessionError::Io(e)) if is_connection_closed(e) => {
            info!(direction, error = %e, "connection closed");
        }
        Err(e) => warn!(direction, error = %e, "forwarder failed"),
    }
}

fn is_connection_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}
