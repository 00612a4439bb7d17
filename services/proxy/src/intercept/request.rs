//! Client-to-backend request interceptor.
//!
//! Requests are never modified today: the interceptor's job is to
//! record `{id -> command}` so the response side can classify each
//! reply, then forward the original bytes verbatim.  Messages that fail
//! envelope decoding still flow through untouched.

use super::{MAX_BUFFER_BYTES, MAX_TRANSFORMS_PER_READ, READ_CHUNK};
use crate::session::{SessionError, SessionState};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use wfdbg_protocol::framing::{Extract, WireFormat, extract_message};
use wfdbg_protocol::message::{Envelope, MessageKind};

/// Pump requests from the debug client to the backend until EOF.
pub async fn run<R, W>(
    mut reader: R,
    mut writer: W,
    wire: WireFormat,
    state: Arc<SessionState>,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_BUFFER_BYTES {
            return Err(SessionError::BufferOverflow);
        }

        // Drain in bounded batches: the cap keeps single-read work
        // finite, the flush between batches keeps bytes moving.
        'drain: loop {
            let mut transforms = 0;
            while transforms < MAX_TRANSFORMS_PER_READ {
                transforms += 1;
                match extract_message(wire, &buf)? {
                    Extract::NeedMore => break 'drain,
                    Extract::Complete { payload, consumed } => {
                        record_request(&state, &buf[payload]);
                        writer.write_all(&buf[..consumed]).await?;
                        buf.drain(..consumed);
                    }
                }
            }
            writer.flush().await?;
        }
        writer.flush().await?;
    }
}

/// Remember which command an id belongs to, for response correlation.
fn record_request(state: &SessionState, payload: &[u8]) {
    let Some(env) = Envelope::decode(payload) else {
        return;
    };
    if env.kind != MessageKind::Request {
        return;
    }
    let (Some(id), Some(command)) = (env.id, env.command) else {
        return;
    };
    trace!(id = %id, command = %command, "request recorded");
    state.pending.lock().unwrap().insert(id, command);
}
