// wfdbg-protocol: wire-level types for the debugger proxy.
//
// The proxy speaks two debugger protocols on one listening port: the
// length-prefixed framed protocol (Content-Length headers, DAP style)
// and naked concatenated JSON-RPC objects (Delve style).  This crate
// owns everything both interceptors need at the byte level: message
// extraction, the minimal envelope decode, id normalization, and the
// command classification the response transforms dispatch on.

pub mod framing;
pub mod message;

pub use framing::{Extract, FramingError, WireFormat, extract_message, frame_body};
pub use message::{
    Envelope, Location, MessageKind, StepTrigger, is_reserved_id, is_stack_command, normalize_id,
    step_trigger,
};

/// Fabricated ids for auto-step `Command` RPCs. Never forwarded to the IDE.
pub const COMMAND_ID_RANGE: std::ops::RangeInclusive<u64> = 90_000..=90_999;

/// Fabricated ids for auto-step `State`/`Stacktrace` query RPCs.
pub const QUERY_ID_RANGE: std::ops::RangeInclusive<u64> = 99_000..=99_999;
