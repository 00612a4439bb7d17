//! Minimal envelope decode and id/command handling.
//!
//! The interceptors never decode full protocol schemas; they read just
//! enough of each message to correlate requests to responses and to
//! dispatch the handful of transforms.  Everything here operates on
//! `serde_json::Value` so unknown fields survive untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{COMMAND_ID_RANGE, QUERY_ID_RANGE};

/// What a wire message is, as far as the interceptors care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    /// Events and anything else without request/response correlation.
    Event,
}

/// The decoded outer envelope of one wire message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Normalized correlator; `None` on events.
    pub id: Option<String>,
    /// Symbolic operation name; requests only.  For the generic
    /// JSON-RPC `Command` method this is the composite form
    /// (`Command.next`, `Command.continue`, …) so the response side
    /// can distinguish step-over from continue.
    pub command: Option<String>,
    /// The full decoded body, for transforms that need it.
    pub value: Value,
}

impl Envelope {
    /// Decode the outer envelope of a message payload.
    ///
    /// Returns `None` when the payload is not a JSON object or does not
    /// look like either protocol; callers must then pass the original
    /// bytes through untransformed.
    pub fn decode(payload: &[u8]) -> Option<Envelope> {
        let value: Value = serde_json::from_slice(payload).ok()?;
        let obj = value.as_object()?;

        // Framed protocol: discriminated by the `type` field.
        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            return match kind {
                "request" => Some(Envelope {
                    kind: MessageKind::Request,
                    id: obj.get("seq").map(normalize_id),
                    command: obj
                        .get("command")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    value,
                }),
                "response" => Some(Envelope {
                    kind: MessageKind::Response,
                    id: obj.get("request_seq").map(normalize_id),
                    command: None,
                    value,
                }),
                _ => Some(Envelope {
                    kind: MessageKind::Event,
                    id: None,
                    command: None,
                    value,
                }),
            };
        }

        // JSON-RPC: requests carry `method`, responses `result`/`error`.
        if obj.get("method").is_some() {
            let command = rpc_command_name(obj);
            return Some(Envelope {
                kind: MessageKind::Request,
                id: obj.get("id").map(normalize_id),
                command,
                value,
            });
        }
        if obj.contains_key("result") || obj.contains_key("error") {
            return Some(Envelope {
                kind: MessageKind::Response,
                id: obj.get("id").map(normalize_id),
                command: None,
                value,
            });
        }
        Some(Envelope {
            kind: MessageKind::Event,
            id: None,
            command: None,
            value,
        })
    }
}

/// The operation name for a JSON-RPC request, composite-expanded.
///
/// `RPCServer.Command` with `params: [{"name": "next"}]` becomes
/// `Command.next`; other methods are reported namespace-stripped as-is.
fn rpc_command_name(obj: &serde_json::Map<String, Value>) -> Option<String> {
    let method = obj.get("method").and_then(Value::as_str)?;
    let base = method.rsplit('.').next().unwrap_or(method);
    if base == "Command" {
        let params = obj.get("params");
        let sub = params
            .and_then(|p| p.as_array().and_then(|a| a.first()).or(Some(p)))
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str);
        if let Some(sub) = sub {
            return Some(format!("Command.{sub}"));
        }
    }
    Some(base.to_owned())
}

/// Render an id value in its canonical map-key form.
///
/// Numeric ids are rendered without decimals, string ids verbatim, and
/// null as `"null"`.  Both protocols use integer ids in practice, but
/// JSON decoding may surface them as floats.
pub fn normalize_id(id: &Value) -> String {
    match id {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                format!("{:.0}", n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => s.clone(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

/// True when a normalized id falls in a reserved fabricated range.
///
/// Responses with such ids answer auto-step RPCs that originated inside
/// the proxy and must never reach the debug client.
pub fn is_reserved_id(id: &str) -> bool {
    id.parse::<u64>()
        .map(|n| COMMAND_ID_RANGE.contains(&n) || QUERY_ID_RANGE.contains(&n))
        .unwrap_or(false)
}

/// True for commands whose responses carry a stack-frame array to filter.
pub fn is_stack_command(command: &str) -> bool {
    matches!(base_command(command), "stackTrace" | "Stacktrace")
}

/// How a step-like command should behave once auto-stepping lands in
/// user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTrigger {
    /// Step-over family: take one extra step so the cursor visibly moves.
    StepOver,
    /// Continue: stop at the first user-code location, no extra step.
    Continue,
}

/// Classify a (possibly composite) command as step-like, if it is one.
pub fn step_trigger(command: &str) -> Option<StepTrigger> {
    match base_command(command) {
        "next" | "step" | "stepIn" | "stepOut" | "stepout" | "stepin" => Some(StepTrigger::StepOver),
        "continue" => Some(StepTrigger::Continue),
        _ => None,
    }
}

fn base_command(command: &str) -> &str {
    command.rsplit('.').next().unwrap_or(command)
}

/// A source location reported by the backend debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Location {
    pub file: String,
    pub function: String,
    pub line: i64,
}

/// The `State` object inside a JSON-RPC command/state response, if any.
pub fn rpc_state(value: &Value) -> Option<&Value> {
    value.get("result")?.get("State")
}

/// True when a debugger state reports the target as running (no
/// stopped location available yet).
pub fn state_is_running(state: &Value) -> bool {
    state
        .get("Running")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// The current-thread location of a stopped debugger state.
pub fn state_location(state: &Value) -> Option<Location> {
    let thread = state.get("currentThread")?;
    Some(Location {
        file: thread.get("file")?.as_str()?.to_owned(),
        function: thread
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        line: thread.get("line").and_then(Value::as_i64).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_framed_request() {
        let env =
            Envelope::decode(br#"{"seq":3,"type":"request","command":"stackTrace"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Request);
        assert_eq!(env.id.as_deref(), Some("3"));
        assert_eq!(env.command.as_deref(), Some("stackTrace"));
    }

    #[test]
    fn decodes_framed_response_by_request_seq() {
        let env = Envelope::decode(
            br#"{"seq":100,"type":"response","request_seq":3,"success":true,"command":"threads"}"#,
        )
        .unwrap();
        assert_eq!(env.kind, MessageKind::Response);
        assert_eq!(env.id.as_deref(), Some("3"));
    }

    #[test]
    fn decodes_framed_event_without_id() {
        let env = Envelope::decode(br#"{"seq":7,"type":"event","event":"stopped"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Event);
        assert_eq!(env.id, None);
    }

    #[test]
    fn decodes_rpc_request_with_namespace_stripped() {
        let env =
            Envelope::decode(br#"{"method":"RPCServer.Stacktrace","params":[{}],"id":9}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Request);
        assert_eq!(env.id.as_deref(), Some("9"));
        assert_eq!(env.command.as_deref(), Some("Stacktrace"));
    }

    #[test]
    fn expands_generic_command_to_composite() {
        let env = Envelope::decode(
            br#"{"method":"RPCServer.Command","params":[{"name":"next"}],"id":4}"#,
        )
        .unwrap();
        assert_eq!(env.command.as_deref(), Some("Command.next"));

        let env = Envelope::decode(
            br#"{"method":"RPCServer.Command","params":[{"name":"continue"}],"id":5}"#,
        )
        .unwrap();
        assert_eq!(env.command.as_deref(), Some("Command.continue"));
    }

    #[test]
    fn decodes_rpc_response() {
        let env = Envelope::decode(br#"{"id":4,"result":{"State":{}}}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Response);
        assert_eq!(env.id.as_deref(), Some("4"));
    }

    #[test]
    fn normalize_id_renders_without_decimals() {
        assert_eq!(normalize_id(&json!(42)), "42");
        assert_eq!(normalize_id(&json!(42.0)), "42");
        assert_eq!(normalize_id(&json!(-3)), "-3");
        assert_eq!(normalize_id(&json!("abc")), "abc");
        assert_eq!(normalize_id(&Value::Null), "null");
    }

    #[test]
    fn reserved_ranges_cover_both_blocks() {
        assert!(is_reserved_id("90000"));
        assert!(is_reserved_id("90999"));
        assert!(is_reserved_id("99000"));
        assert!(is_reserved_id("99999"));
        assert!(!is_reserved_id("89999"));
        assert!(!is_reserved_id("91000"));
        assert!(!is_reserved_id("98999"));
        assert!(!is_reserved_id("100000"));
        assert!(!is_reserved_id("null"));
    }

    #[test]
    fn stack_commands_match_both_protocols() {
        assert!(is_stack_command("stackTrace"));
        assert!(is_stack_command("Stacktrace"));
        assert!(is_stack_command("RPCServer.Stacktrace"));
        assert!(!is_stack_command("threads"));
    }

    #[test]
    fn step_triggers_classify_by_base_command() {
        assert_eq!(step_trigger("next"), Some(StepTrigger::StepOver));
        assert_eq!(step_trigger("Command.next"), Some(StepTrigger::StepOver));
        assert_eq!(step_trigger("stepOut"), Some(StepTrigger::StepOver));
        assert_eq!(step_trigger("continue"), Some(StepTrigger::Continue));
        assert_eq!(
            step_trigger("Command.continue"),
            Some(StepTrigger::Continue)
        );
        assert_eq!(step_trigger("evaluate"), None);
    }

    #[test]
    fn state_location_reads_current_thread() {
        let state = json!({
            "Running": false,
            "currentThread": {
                "id": 1,
                "file": "/work/main.go",
                "line": 42,
                "function": {"name": "main.HandleOrder"}
            }
        });
        let loc = state_location(&state).unwrap();
        assert_eq!(loc.file, "/work/main.go");
        assert_eq!(loc.function, "main.HandleOrder");
        assert_eq!(loc.line, 42);
        assert!(!state_is_running(&state));
        assert!(state_is_running(&json!({"Running": true})));
    }
}
