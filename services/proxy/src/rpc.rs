//! Auxiliary JSON-RPC client to the backend debugger.
//!
//! The auto-step controller drives the backend over its own private
//! connection so its step RPCs never interleave with in-flight IDE
//! traffic on the proxied socket.  Request ids are drawn from the
//! reserved fabricated ranges: command ids from 90000-90999, state
//! query ids from 99000-99999.  The response interceptor drops any
//! response in those ranges unconditionally, so even a leak onto the
//! proxied socket could never reach the IDE.

use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use wfdbg_protocol::framing::{Extract, extract_unframed};
use wfdbg_protocol::{COMMAND_ID_RANGE, QUERY_ID_RANGE, normalize_id};

/// Per-call reply deadline.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backend closed the aux connection")]
    Closed,
    #[error("no reply within {CALL_TIMEOUT:?}")]
    Timeout,
}

/// A blocking-style JSON-RPC client over a dedicated TCP connection.
///
/// Calls are strictly serialized: one request in flight at a time,
/// matched to its reply by id.
pub struct AuxRpc {
    stream: TcpStream,
    buf: Vec<u8>,
    next_command_id: u64,
    next_query_id: u64,
}

impl AuxRpc {
    pub async fn connect(addr: SocketAddr) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(AuxRpc {
            stream,
            buf: Vec::new(),
            next_command_id: *COMMAND_ID_RANGE.start(),
            next_query_id: *QUERY_ID_RANGE.start(),
        })
    }

    /// Issue a debugger command (`next`, `continue`, ...) and return the
    /// full response envelope.
    pub async fn command(&mut self, name: &str) -> Result<Value, RpcError> {
        let id = self.next_command_id;
        self.next_command_id = if id == *COMMAND_ID_RANGE.end() {
            *COMMAND_ID_RANGE.start()
        } else {
            id + 1
        };
        self.call(id, "RPCServer.Command", json!([{ "name": name }]))
            .await
    }

    /// Query the current debugger state.
    pub async fn state(&mut self) -> Result<Value, RpcError> {
        let id = self.next_query_id;
        self.next_query_id = if id == *QUERY_ID_RANGE.end() {
            *QUERY_ID_RANGE.start()
        } else {
            id + 1
        };
        self.call(id, "RPCServer.State", json!([{}])).await
    }

    async fn call(&mut self, id: u64, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = json!({ "method": method, "params": params, "id": id });
        let bytes = serde_json::to_vec(&request)?;
        self.stream.write_all(&bytes).await?;

        let want = id.to_string();
        tokio::time::timeout(CALL_TIMEOUT, self.read_reply(&want))
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    async fn read_reply(&mut self, want_id: &str) -> Result<Value, RpcError> {
        let mut chunk = [0u8; 8192];
        loop {
            while let Extract::Complete { payload, consumed } = extract_unframed(&self.buf) {
                let value: Option<Value> = serde_json::from_slice(&self.buf[payload]).ok();
                self.buf.drain(..consumed);
                let Some(value) = value else { continue };
                let id = value.get("id").map(normalize_id);
                if id.as_deref() == Some(want_id) {
                    return Ok(value);
                }
                // A reply to an older, timed-out call; skip it.
                debug!(got = ?id, want = want_id, "discarding stale aux reply");
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RpcError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
