//! The request/response interception pipeline.
//!
//! Each proxied direction is an explicit framing actor: read bytes,
//! extract whole messages, transform or pass through, write.  A message
//! either leaves byte-identical or is replaced by a complete re-framed
//! substitute; there are no partial writes.

pub mod request;
pub mod response;

/// Overall cap on a direction's accumulation buffer.
pub const MAX_BUFFER_BYTES: usize = wfdbg_protocol::framing::MAX_PAYLOAD_BYTES;

/// Cap on messages processed per read, so forward progress stays
/// detectable even on a pathological stream.
pub const MAX_TRANSFORMS_PER_READ: usize = 100;

/// Socket read granularity.
pub(crate) const READ_CHUNK: usize = 8 * 1024;
