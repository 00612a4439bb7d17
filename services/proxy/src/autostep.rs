//! Auto-step controller.
//!
//! When the user steps or continues and lands inside adapter code, the
//! controller drives the backend through repeated step-overs on the
//! auxiliary RPC connection until execution reaches user code again,
//! then synthesizes the single response the IDE is waiting for.  The
//! IDE never learns the intermediate stops existed.
//!
//! While the controller is stepping, no other backend RPC can be in
//! flight: it runs inside the response interceptor's handling of the
//! triggering response, and the IDE will not send another request until
//! that response arrives.

use crate::classify::{CodeKind, classify};
use crate::counters::SessionCounters;
use crate::rpc::AuxRpc;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use wfdbg_protocol::framing::{WireFormat, frame_body};
use wfdbg_protocol::message::{StepTrigger, rpc_state, state_is_running, state_location};

/// Cap on step-over iterations per controller run.
pub const MAX_AUTO_STEPS: u32 = 30;

/// Wait between state polls while the backend reports itself running.
const RUNNING_POLL: Duration = Duration::from_millis(200);

/// Bound on running-state polls before giving up on the current step.
const MAX_RUNNING_POLLS: u32 = 150;

/// Top-frame function names the adapter plants as internal pause points.
const SENTINEL_MARKERS: &[&str] = &["raiseSentinelBreakpoint", "RaiseSentinelBreakpoint"];

/// Whether a top-frame function name is an adapter sentinel.
pub fn is_sentinel(function: &str) -> bool {
    SENTINEL_MARKERS.iter().any(|m| function.contains(m))
}

/// What the controller hands back to the response interceptor.
#[derive(Debug)]
pub enum StepOutcome {
    /// Emit these re-framed bytes in place of the original response.
    Substitute(Vec<u8>),
    /// Controller could not produce a state; emit the original bytes.
    PassThrough,
}

/// Drives step-over loops over a private backend connection.
pub struct AutoStepper {
    rpc: AuxRpc,
    working_dir: PathBuf,
}

impl AutoStepper {
    pub fn new(rpc: AuxRpc, working_dir: PathBuf) -> Self {
        AutoStepper { rpc, working_dir }
    }

    /// Step the backend until execution leaves adapter code, then
    /// synthesize the response for the user's original command.
    ///
    /// A thread already stopped in user code takes zero steps and gets
    /// a response reflecting the current state.  A step-over trigger
    /// that stepped its way back into user code takes one extra step so
    /// the cursor visibly moves; a continue trigger stops where the
    /// first user-code stop happened.
    pub async fn step_until_user_code(
        &mut self,
        trigger: StepTrigger,
        original_id: &Value,
        wire: WireFormat,
        counters: &SessionCounters,
    ) -> StepOutcome {
        SessionCounters::bump(&counters.auto_step_runs);

        let mut last_state = self.query_state().await;
        if let Some(state) = &last_state {
            if self.in_user_code(state) {
                debug!("already stopped in user code, zero steps");
                return self.synthesize(original_id, last_state, wire);
            }
        }

        let mut steps = 0u32;
        let mut reached_user = false;
        while steps < MAX_AUTO_STEPS {
            steps += 1;
            SessionCounters::bump(&counters.auto_steps);
            let state = match self.step_over().await {
                Some(state) => state,
                // RPC errors are retried within the same iteration cap.
                None => continue,
            };
            let in_user = self.in_user_code(&state);
            last_state = Some(state);
            if in_user {
                reached_user = true;
                break;
            }
        }
        if !reached_user {
            warn!(steps, "auto-step cap reached before user code");
        }

        if reached_user && trigger == StepTrigger::StepOver {
            SessionCounters::bump(&counters.auto_steps);
            if let Some(state) = self.step_over().await {
                last_state = Some(state);
            }
        }

        self.synthesize(original_id, last_state, wire)
    }

    /// Handle a stopped event whose thread may be parked on an adapter
    /// sentinel.  Returns the id of the thread to report to the IDE
    /// after stepping the backend into user code, or `None` when the
    /// stop is not a sentinel (the event should pass through).
    pub async fn resolve_sentinel_stop(&mut self, counters: &SessionCounters) -> Option<i64> {
        let state = self.query_state().await?;
        let location = state_location(&state)?;
        if !is_sentinel(&location.function) {
            return None;
        }
        SessionCounters::bump(&counters.auto_step_runs);

        let mut current = state;
        let mut steps = 0u32;
        while steps < MAX_AUTO_STEPS && !self.in_user_code(&current) {
            steps += 1;
            SessionCounters::bump(&counters.auto_steps);
            if let Some(state) = self.step_over().await {
                current = state;
            }
        }
        current
            .get("currentThread")
            .and_then(|t| t.get("id"))
            .and_then(Value::as_i64)
    }

    /// One step-over RPC, settled past any transient running state.
    async fn step_over(&mut self) -> Option<Value> {
        match self.rpc.command("next").await {
            Ok(reply) => {
                let state = rpc_state(&reply)?.clone();
                Some(self.settle(state).await)
            }
            Err(e) => {
                warn!(error = %e, "auto-step RPC failed");
                None
            }
        }
    }

    async fn query_state(&mut self) -> Option<Value> {
        match self.rpc.state().await {
            Ok(reply) => {
                let state = rpc_state(&reply)?.clone();
                Some(self.settle(state).await)
            }
            Err(e) => {
                warn!(error = %e, "state query failed");
                None
            }
        }
    }

    /// Poll the backend until it reports a stopped state.
    async fn settle(&mut self, mut state: Value) -> Value {
        let mut polls = 0u32;
        while state_is_running(&state) && polls < MAX_RUNNING_POLLS {
            polls += 1;
            tokio::time::sleep(RUNNING_POLL).await;
            match self.rpc.state().await {
                Ok(reply) => {
                    if let Some(next) = rpc_state(&reply) {
                        state = next.clone();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "state poll failed while running");
                    break;
                }
            }
        }
        state
    }

    fn in_user_code(&self, state: &Value) -> bool {
        state_location(state)
            .map(|loc| classify(&loc.file, &self.working_dir) == CodeKind::User)
            .unwrap_or(false)
    }

    fn synthesize(
        &self,
        original_id: &Value,
        state: Option<Value>,
        wire: WireFormat,
    ) -> StepOutcome {
        let Some(state) = state else {
            // Never saw a usable state; let the original response out.
            return StepOutcome::PassThrough;
        };
        let envelope = json!({ "id": original_id, "result": { "State": state } });
        match serde_json::to_vec(&envelope) {
            Ok(body) => StepOutcome::Substitute(frame_body(wire, &body)),
            Err(e) => {
                warn!(error = %e, "failed to encode synthesized response");
                StepOutcome::PassThrough
            }
        }
    }
}
