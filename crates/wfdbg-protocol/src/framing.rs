//! Message extraction for both wire protocols.
//!
//! Both extractors are pure functions over a byte slice: they either
//! locate one complete message and report how many bytes it consumed,
//! or ask the caller to buffer more input.  Neither validates JSON
//! beyond what is needed to find the message boundary; full decoding
//! is the caller's responsibility.
//!
//! # Protocol selection
//! The first byte a client sends decides the wire format for the whole
//! session: a capital `C` (the `C` of `Content-Length`) selects the
//! framed protocol, anything else the unframed JSON-RPC variant.

use std::ops::Range;

/// Upper bound on a framed header block before the stream is declared
/// malformed.
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;

/// Upper bound on a single message payload, either declared via
/// `Content-Length` or accumulated while brace-walking.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "Content-Length:";

/// The two debugger wire protocols multiplexed on one listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `Content-Length: N\r\n\r\n<N bytes JSON>` (debug-adapter style).
    Framed,
    /// Naked concatenated JSON objects (JSON-RPC style).
    Unframed,
}

impl WireFormat {
    /// Guess the session protocol from the first byte the client sends.
    /// The choice is permanent for the session's duration.
    pub fn from_first_byte(byte: u8) -> Self {
        if byte == b'C' {
            WireFormat::Framed
        } else {
            WireFormat::Unframed
        }
    }
}

/// Outcome of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// One complete message was found.  `payload` indexes the JSON body
    /// inside the input buffer; `consumed` is the total prefix to drain
    /// (headers + payload for framed, any leading bytes + the object
    /// for unframed).  `buf[..consumed]` is the exact framed form.
    Complete { payload: Range<usize>, consumed: usize },
    /// The buffer does not yet hold a complete message.
    NeedMore,
}

/// Framing violations. All of these abort the session.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("header block exceeds {MAX_HEADER_BYTES} bytes without terminator")]
    HeaderOverflow,
    #[error("missing or unparseable Content-Length header")]
    BadContentLength,
    #[error("declared content length {0} outside [0, {MAX_PAYLOAD_BYTES}]")]
    OversizedPayload(i64),
}

/// Extract one message according to the session's wire format.
pub fn extract_message(wire: WireFormat, buf: &[u8]) -> Result<Extract, FramingError> {
    match wire {
        WireFormat::Framed => extract_framed(buf),
        WireFormat::Unframed => Ok(extract_unframed(buf)),
    }
}

/// Extract one `Content-Length`-framed message.
///
/// Returns `NeedMore` until the full header block and declared payload
/// are buffered.  A header block that grows past [`MAX_HEADER_BYTES`]
/// without its `\r\n\r\n` terminator, or a declared length outside
/// `[0, MAX_PAYLOAD_BYTES]`, is a framing violation.
pub fn extract_framed(buf: &[u8]) -> Result<Extract, FramingError> {
    let Some(term) = find_subsequence(buf, HEADER_TERMINATOR) else {
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(FramingError::HeaderOverflow);
        }
        return Ok(Extract::NeedMore);
    };

    let header = std::str::from_utf8(&buf[..term]).map_err(|_| FramingError::BadContentLength)?;
    let length = parse_content_length(header)?;
    if length < 0 || length as usize > MAX_PAYLOAD_BYTES {
        return Err(FramingError::OversizedPayload(length));
    }
    let length = length as usize;

    let body_start = term + HEADER_TERMINATOR.len();
    if buf.len() < body_start + length {
        return Ok(Extract::NeedMore);
    }
    Ok(Extract::Complete {
        payload: body_start..body_start + length,
        consumed: body_start + length,
    })
}

/// Extract one naked JSON object by walking brace depth.
///
/// Honours string quoting and single-character backslash escapes, so
/// braces inside string literals do not confuse the walk.  Bytes before
/// the first `{` (stray whitespace between concatenated objects) are
/// included in `consumed` so pass-through stays byte-identical.
pub fn extract_unframed(buf: &[u8]) -> Extract {
    let Some(start) = buf.iter().position(|&b| b == b'{') else {
        return Extract::NeedMore;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in buf.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Extract::Complete {
                        payload: start..i + 1,
                        consumed: i + 1,
                    };
                }
            }
            _ => {}
        }
    }
    Extract::NeedMore
}

/// Re-frame a substitute message body for the given wire format.
///
/// Framed messages get a rebuilt `Content-Length` header; unframed
/// bodies go out as-is and simply precede the already-buffered tail.
pub fn frame_body(wire: WireFormat, body: &[u8]) -> Vec<u8> {
    match wire {
        WireFormat::Framed => {
            let mut out = format!("{CONTENT_LENGTH} {}\r\n\r\n", body.len()).into_bytes();
            out.extend_from_slice(body);
            out
        }
        WireFormat::Unframed => body.to_vec(),
    }
}

fn parse_content_length(header: &str) -> Result<i64, FramingError> {
    for line in header.split("\r\n") {
        if let Some(value) = line.strip_prefix(CONTENT_LENGTH) {
            return value
                .trim()
                .parse::<i64>()
                .map_err(|_| FramingError::BadContentLength);
        }
    }
    Err(FramingError::BadContentLength)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
