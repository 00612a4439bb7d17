//! History/breakpoint coordination surface.
//!
//! A single process-wide HTTP server through which the IDE panel
//! uploads event history and breakpoints, the replayer adapter fetches
//! them, and the adapter reports the event it is currently executing.
//! Current-event reports are republished on an in-process broadcast
//! bus for the IDE-facing UI to consume.

pub mod http;
pub mod store;

use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use store::HistoryStore;
use tokio::sync::broadcast;
use tracing::{error, info};

const EVENT_BUS_CAPACITY: usize = 64;

/// In-process notifications emitted by the coordination endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// The adapter reported (or cleared) the event it is executing.
    CurrentEventChanged { event_id: Option<u64> },
}

/// Shared handler state for the coordination router.
#[derive(Clone)]
pub struct CoordinationState {
    store: Arc<Mutex<HistoryStore>>,
    events: broadcast::Sender<CoordinationEvent>,
    port: u16,
}

/// Handle to the running coordination server.
pub struct CoordinationServer {
    local_addr: SocketAddr,
    events: broadcast::Sender<CoordinationEvent>,
}

impl CoordinationServer {
    /// Bind the listener, reload persisted state from `data_dir`, and
    /// start serving in a background task.
    pub async fn start(addr: SocketAddr, data_dir: &Path) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let state = CoordinationState {
            store: Arc::new(Mutex::new(HistoryStore::open(data_dir))),
            events: events.clone(),
            port: local_addr.port(),
        };
        let router = http::build_router(state);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "coordination server failed");
            }
        });

        info!(addr = %local_addr, "coordination server listening");
        Ok(CoordinationServer { local_addr, events })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to current-event notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }
}
