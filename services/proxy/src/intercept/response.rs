//! Backend-to-client response interceptor.
//!
//! Every message from the backend is correlated to the request that
//! caused it, then dispatched:
//!
//! - stack-trace responses get adapter frames filtered off the deep end
//!   of the stack, with the frame map rebuilt;
//! - step/continue responses that stopped in adapter code hand control
//!   to the auto-step controller and are replaced by its synthesized
//!   response;
//! - stopped events parked on an adapter sentinel are re-targeted at
//!   the thread the controller stepped into user code;
//! - responses whose id falls in a reserved fabricated range are
//!   dropped outright;
//! - everything else passes through byte-identical.

use super::{MAX_BUFFER_BYTES, MAX_TRANSFORMS_PER_READ, READ_CHUNK};
use crate::autostep::{AutoStepper, StepOutcome};
use crate::classify::{CodeKind, classify};
use crate::counters::SessionCounters;
use crate::session::{SessionError, SessionState};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use wfdbg_protocol::framing::{Extract, WireFormat, extract_message, frame_body};
use wfdbg_protocol::message::{
    Envelope, MessageKind, StepTrigger, is_reserved_id, is_stack_command, rpc_state,
    state_location, step_trigger,
};

/// What to do with one extracted message.
#[derive(Debug)]
enum Action {
    /// Emit the original bytes verbatim.
    Forward,
    /// Emit these re-framed bytes instead of the original message.
    Substitute(Vec<u8>),
    /// Emit nothing; the message never reaches the client.
    Drop,
}

/// The backend-to-client framing actor.
pub struct ResponseInterceptor {
    wire: WireFormat,
    state: Arc<SessionState>,
    working_dir: PathBuf,
    stepper: AutoStepper,
}

impl ResponseInterceptor {
    pub fn new(
        wire: WireFormat,
        state: Arc<SessionState>,
        working_dir: PathBuf,
        stepper: AutoStepper,
    ) -> Self {
        ResponseInterceptor {
            wire,
            state,
            working_dir,
            stepper,
        }
    }

    /// Pump responses from the backend to the debug client until EOF.
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> Result<(), SessionError>
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
                    match extract_message(self.wire, &buf)? {
                        Extract::NeedMore => break 'drain,
                        Extract::Complete { payload, consumed } => {
                            let action = self.process(&buf[payload]).await;
                            match action {
                                Action::Forward => writer.write_all(&buf[..consumed]).await?,
                                Action::Substitute(bytes) => writer.write_all(&bytes).await?,
                                Action::Drop => {}
                            }
                            buf.drain(..consumed);
                        }
                    }
                }
                writer.flush().await?;
            }
            writer.flush().await?;
        }
    }

    async fn process(&mut self, payload: &[u8]) -> Action {
        let Some(env) = Envelope::decode(payload) else {
            // Not decodable: never transform what we cannot read.
            return Action::Forward;
        };
        match env.kind {
            MessageKind::Response => self.process_response(env).await,
            MessageKind::Event => self.process_event(env).await,
            MessageKind::Request => Action::Forward,
        }
    }

    async fn process_response(&mut self, env: Envelope) -> Action {
        SessionCounters::bump(&self.state.counters.responses);
        let Some(id) = env.id.clone() else {
            return Action::Forward;
        };
        if is_reserved_id(&id) {
            // The answer to an auto-step RPC leaked onto the proxied
            // socket; it must never surface to the IDE.
            SessionCounters::bump(&self.state.counters.fabricated_dropped);
            warn!(id = %id, "dropping response with reserved fabricated id");
            return Action::Drop;
        }
        let command = self.state.pending.lock().unwrap().remove(&id);

        if let Some(state) = rpc_state(&env.value) {
            if let Some(location) = state_location(state) {
                *self.state.current_location.write().unwrap() = Some(location);
            }
        }

        let Some(command) = command else {
            return Action::Forward;
        };
        if is_stack_command(&command) {
            return filter_stack(self.wire, &self.working_dir, &self.state, env);
        }
        if let Some(trigger) = step_trigger(&command) {
            return self.process_step_response(env, trigger).await;
        }
        Action::Forward
    }

    /// A step or continue finished; auto-step if it parked in adapter code.
    async fn process_step_response(&mut self, env: Envelope, trigger: StepTrigger) -> Action {
        // The framed protocol reports stop locations via events, not
        // step responses; without a location there is nothing to check.
        let Some(state) = rpc_state(&env.value) else {
            return Action::Forward;
        };
        let Some(location) = state_location(state) else {
            return Action::Forward;
        };
        if classify(&location.file, &self.working_dir) == CodeKind::User {
            return Action::Forward;
        }

        debug!(file = %location.file, "step stopped in adapter code, auto-stepping");
        let original_id = env.value.get("id").cloned().unwrap_or(Value::Null);
        match self
            .stepper
            .step_until_user_code(trigger, &original_id, self.wire, &self.state.counters)
            .await
        {
            StepOutcome::Substitute(bytes) => Action::Substitute(bytes),
            StepOutcome::PassThrough => Action::Forward,
        }
    }

    /// Stopped events parked on an adapter sentinel are re-targeted.
    async fn process_event(&mut self, mut env: Envelope) -> Action {
        if self.wire != WireFormat::Framed {
            return Action::Forward;
        }
        if env.value.get("event").and_then(Value::as_str) != Some("stopped") {
            return Action::Forward;
        }
        let reason = env
            .value
            .get("body")
            .and_then(|b| b.get("reason"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if reason == "exception" || reason == "unknown" {
            return Action::Forward;
        }

        match self
            .stepper
            .resolve_sentinel_stop(&self.state.counters)
            .await
        {
            Some(thread_id) => {
                if let Some(body) = env.value.get_mut("body") {
                    body["threadId"] = json!(thread_id);
                }
                match serde_json::to_vec(&env.value) {
                    Ok(bytes) => Action::Substitute(frame_body(self.wire, &bytes)),
                    Err(e) => {
                        warn!(error = %e, "failed to re-encode stopped event");
                        Action::Forward
                    }
                }
            }
            None => Action::Forward,
        }
    }
}

/// Filter adapter frames off the deep end of a stack-trace response.
///
/// Scans from the deepest frame toward the top for the first user-code
/// frame `k`, keeps frames `0..=k`, renumbers them 0-based, and rebuilds
/// the session frame map (identity, since only a suffix is dropped).
/// A stack with no user-code frame at all passes through unchanged.
fn filter_stack(
    wire: WireFormat,
    working_dir: &std::path::Path,
    state: &SessionState,
    mut env: Envelope,
) -> Action {
    let Some(frames) = stack_frames(wire, &env.value) else {
        return Action::Forward;
    };
    let Some(k) = frames
        .iter()
        .rposition(|f| classify(frame_file(wire, f), working_dir) == CodeKind::User)
    else {
        return Action::Forward;
    };

    let mut kept: Vec<Value> = frames[..=k].to_vec();
    if wire == WireFormat::Framed {
        for (i, frame) in kept.iter_mut().enumerate() {
            if let Some(obj) = frame.as_object_mut() {
                obj.insert("id".to_owned(), json!(i));
            }
        }
    }
    let dropped = frames.len() - kept.len();

    let mut map = HashMap::with_capacity(k + 1);
    for i in 0..=k {
        map.insert(i, i);
    }
    *state.frame_map.write().unwrap() = map;

    if dropped == 0 {
        // Nothing below the deepest user frame; emit the original bytes.
        return Action::Forward;
    }

    let total = kept.len();
    match wire {
        WireFormat::Framed => {
            let Some(body) = env.value.get_mut("body") else {
                return Action::Forward;
            };
            body["stackFrames"] = Value::Array(kept);
            body["totalFrames"] = json!(total);
        }
        WireFormat::Unframed => {
            let Some(result) = env.value.get_mut("result") else {
                return Action::Forward;
            };
            result["Locations"] = Value::Array(kept);
        }
    }
    SessionCounters::bump(&state.counters.stack_traces_filtered);
    debug!(kept = total, dropped, "stack trace filtered");

    match serde_json::to_vec(&env.value) {
        Ok(bytes) => Action::Substitute(frame_body(wire, &bytes)),
        Err(e) => {
            warn!(error = %e, "failed to re-encode filtered stack trace");
            Action::Forward
        }
    }
}

fn stack_frames(wire: WireFormat, value: &Value) -> Option<&Vec<Value>> {
    match wire {
        WireFormat::Framed => value.get("body")?.get("stackFrames")?.as_array(),
        WireFormat::Unframed => value.get("result")?.get("Locations")?.as_array(),
    }
}

fn frame_file(wire: WireFormat, frame: &Value) -> &str {
    let file = match wire {
        WireFormat::Framed => frame.get("source").and_then(|s| s.get("path")),
        WireFormat::Unframed => frame.get("file"),
    };
    file.and_then(Value::as_str).unwrap_or_default()
}
