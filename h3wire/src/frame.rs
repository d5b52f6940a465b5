//! HTTP/3 frame definitions per RFC 9114 Section 7.
//!
//! Every frame is `type (varint) | length (varint) | payload`. Frame types
//! split into two handling kinds:
//!
//! - *streaming* (DATA, HEADERS, PUSH_PROMISE, reserved and unknown types):
//!   the header is surfaced as soon as it is parsed and the payload is drained
//!   by the caller in whatever chunks arrive;
//! - *fixed* (CANCEL_PUSH, SETTINGS, GOAWAY, MAX_PUSH_ID): the payload is
//!   buffered whole and parsed before the frame is surfaced.
//!
//! [`Frame`] only describes headers for streaming kinds; payload bytes never
//! live inside it.

use std::fmt;

use bytes::BufMut;

use crate::error::{Error, ErrorCode, Result};
use crate::settings::SettingsFrame;
use crate::varint;

/// Frame type codes (RFC 9114 Section 11.2.1).
pub mod frame_type {
    pub const DATA: u64 = 0x00;
    pub const HEADERS: u64 = 0x01;
    pub const CANCEL_PUSH: u64 = 0x03;
    pub const SETTINGS: u64 = 0x04;
    pub const PUSH_PROMISE: u64 = 0x05;
    pub const GOAWAY: u64 = 0x07;
    pub const MAX_PUSH_ID: u64 = 0x0d;
}

/// Frame types defined by HTTP/2 with no HTTP/3 meaning (RFC 9114 Section 7.2.8).
///
/// PRIORITY (0x02), PING (0x06), WINDOW_UPDATE (0x08), CONTINUATION (0x09).
const HTTP2_RESERVED_TYPES: &[u64] = &[0x02, 0x06, 0x08, 0x09];

/// How a frame type's payload is handled by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Header surfaced eagerly, payload drained by the caller.
    Streaming,
    /// Payload buffered and parsed before the frame is surfaced.
    Fixed,
}

impl FrameKind {
    /// Handling kind for a frame type code.
    pub fn of(frame_type: u64) -> Self {
        match frame_type {
            frame_type::CANCEL_PUSH
            | frame_type::SETTINGS
            | frame_type::GOAWAY
            | frame_type::MAX_PUSH_ID => FrameKind::Fixed,
            _ => FrameKind::Streaming,
        }
    }
}

/// True for HTTP/2 frame types that must not be sent in HTTP/3.
pub fn is_http2_reserved(frame_type: u64) -> bool {
    HTTP2_RESERVED_TYPES.contains(&frame_type)
}

/// A frame that could not be decoded.
///
/// Carries the error code the connection must close with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    pub code: ErrorCode,
    pub reason: String,
}

impl MalformedFrame {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Connection-level error for this frame.
    pub fn to_error(&self) -> Error {
        Error::protocol(self.code, self.reason.clone())
    }
}

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame ({}): {}", self.code, self.reason)
    }
}

/// A decoded HTTP/3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA (0x00): `length` payload bytes follow.
    Data { length: u64 },

    /// HEADERS (0x01): `length` bytes of encoded field section follow.
    Headers { length: u64 },

    /// PUSH_PROMISE (0x05). The push ID has been consumed; `length` counts
    /// only the encoded field section that follows it.
    PushPromise { push_id: u64, length: u64 },

    /// Reserved (grease) frame type. Payload must be discarded.
    Reserved { frame_type: u64, length: u64 },

    /// Any other unassigned frame type. Payload must be discarded.
    Unknown { frame_type: u64, length: u64 },

    /// CANCEL_PUSH (0x03).
    CancelPush { push_id: u64 },

    /// SETTINGS (0x04).
    Settings(SettingsFrame),

    /// GOAWAY (0x07). A stream ID from the server, a push ID from the client.
    GoAway { id: u64 },

    /// MAX_PUSH_ID (0x0d).
    MaxPushId { push_id: u64 },

    /// Decoding failed; no further frames follow on this stream.
    Malformed(MalformedFrame),
}

impl Frame {
    /// Wire type code, or `None` for [`Frame::Malformed`].
    pub fn frame_type(&self) -> Option<u64> {
        let code = match self {
            Frame::Data { .. } => frame_type::DATA,
            Frame::Headers { .. } => frame_type::HEADERS,
            Frame::PushPromise { .. } => frame_type::PUSH_PROMISE,
            Frame::Reserved { frame_type, .. } | Frame::Unknown { frame_type, .. } => *frame_type,
            Frame::CancelPush { .. } => frame_type::CANCEL_PUSH,
            Frame::Settings(_) => frame_type::SETTINGS,
            Frame::GoAway { .. } => frame_type::GOAWAY,
            Frame::MaxPushId { .. } => frame_type::MAX_PUSH_ID,
            Frame::Malformed(_) => return None,
        };
        Some(code)
    }

    /// Handling kind, or `None` for [`Frame::Malformed`].
    pub fn kind(&self) -> Option<FrameKind> {
        self.frame_type().map(FrameKind::of)
    }

    /// Payload bytes the caller still has to drain after the header.
    ///
    /// Always 0 for fixed frames and malformed frames.
    pub fn streaming_length(&self) -> u64 {
        match self {
            Frame::Data { length }
            | Frame::Headers { length }
            | Frame::PushPromise { length, .. }
            | Frame::Reserved { length, .. }
            | Frame::Unknown { length, .. } => *length,
            _ => 0,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Frame::Malformed(_))
    }

    /// True for HTTP/2-only types, which are a connection error on any stream.
    pub fn is_http2_reserved(&self) -> bool {
        matches!(self, Frame::Unknown { frame_type, .. } if is_http2_reserved(*frame_type))
    }

    /// True if this frame may appear on a control stream (RFC 9114 Section 7.2).
    ///
    /// Reserved and unknown types are allowed and ignored.
    pub fn is_allowed_on_control_stream(&self) -> bool {
        match self {
            Frame::CancelPush { .. }
            | Frame::Settings(_)
            | Frame::GoAway { .. }
            | Frame::MaxPushId { .. }
            | Frame::Reserved { .. } => true,
            Frame::Unknown { .. } => !self.is_http2_reserved(),
            _ => false,
        }
    }

    /// True if this frame may appear on a request or push stream.
    ///
    /// PUSH_PROMISE is further restricted to server-to-client request streams
    /// by the connection.
    pub fn is_allowed_on_request_stream(&self) -> bool {
        match self {
            Frame::Data { .. }
            | Frame::Headers { .. }
            | Frame::PushPromise { .. }
            | Frame::Reserved { .. } => true,
            Frame::Unknown { .. } => !self.is_http2_reserved(),
            _ => false,
        }
    }
}

/// Write a complete fixed-content frame (CANCEL_PUSH, SETTINGS, GOAWAY, MAX_PUSH_ID).
///
/// # Errors
///
/// Streaming frames have no payload to write here; use [`write_frame_header`]
/// or [`write_push_promise_header`] for them.
pub fn write_frame<B: BufMut>(frame: &Frame, buf: &mut B) -> Result<usize> {
    let (code, single) = match frame {
        Frame::CancelPush { push_id } => (frame_type::CANCEL_PUSH, *push_id),
        Frame::GoAway { id } => (frame_type::GOAWAY, *id),
        Frame::MaxPushId { push_id } => (frame_type::MAX_PUSH_ID, *push_id),
        Frame::Settings(settings) => {
            let len = settings.encoded_len();
            let mut written = varint::encode_buf(frame_type::SETTINGS, buf)?;
            written += varint::encode_buf(len as u64, buf)?;
            settings.encode(buf)?;
            return Ok(written + len);
        }
        other => {
            return Err(Error::protocol(
                ErrorCode::InternalError,
                format!("cannot write streaming frame {:?} as a whole", other),
            ))
        }
    };
    let mut written = varint::encode_buf(code, buf)?;
    written += varint::encode_buf(varint::encoded_len(single) as u64, buf)?;
    written += varint::encode_buf(single, buf)?;
    Ok(written)
}

/// Write the header of a streaming frame; `length` payload bytes must follow.
pub fn write_frame_header<B: BufMut>(frame_type: u64, length: u64, buf: &mut B) -> Result<usize> {
    if FrameKind::of(frame_type) == FrameKind::Fixed {
        return Err(Error::protocol(
            ErrorCode::InternalError,
            format!("frame type 0x{:x} has fixed content", frame_type),
        ));
    }
    let written = varint::encode_buf(frame_type, buf)?;
    Ok(written + varint::encode_buf(length, buf)?)
}

/// Write a PUSH_PROMISE header including the push ID.
///
/// `field_section_len` encoded field section bytes must follow.
pub fn write_push_promise_header<B: BufMut>(
    push_id: u64,
    field_section_len: u64,
    buf: &mut B,
) -> Result<usize> {
    let length = varint::encoded_len(push_id) as u64 + field_section_len;
    let mut written = write_frame_header(frame_type::PUSH_PROMISE, length, buf)?;
    written += varint::encode_buf(push_id, buf)?;
    Ok(written)
}

/// Write a whole DATA frame.
pub fn write_data<B: BufMut>(payload: &[u8], buf: &mut B) -> Result<usize> {
    let written = write_frame_header(frame_type::DATA, payload.len() as u64, buf)?;
    buf.put_slice(payload);
    Ok(written + payload.len())
}

/// Write a whole HEADERS frame around an encoded field section.
pub fn write_headers<B: BufMut>(field_section: &[u8], buf: &mut B) -> Result<usize> {
    let written = write_frame_header(frame_type::HEADERS, field_section.len() as u64, buf)?;
    buf.put_slice(field_section);
    Ok(written + field_section.len())
}
