//! Incremental frame decoder for a single HTTP/3 stream.
//!
//! Bytes are handed over with [`FrameDecoder::submit`] in whatever pieces the
//! transport delivers them. Nothing is parsed until [`FrameDecoder::poll`] is
//! called, which advances only as far as the buffered bytes allow:
//!
//! ```text
//! AwaitingType -> AwaitingLength -> (AwaitingPushId) -> Draining ---+
//!       ^                      \                                    |
//!       |                       +-> FixedPayload (surfaced once) ---+
//!       +-----------------------------------------------------------+
//! ```
//!
//! A streaming frame stays current, and `poll` keeps returning it, until its
//! payload has been drained with [`FrameDecoder::read_payload_bytes`]. Any
//! violation turns the decoder into a terminal `Malformed` state.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::config::H3Config;
use crate::error::ErrorCode;
use crate::frame::{frame_type, Frame, FrameKind, MalformedFrame};
use crate::settings::SettingsFrame;
use crate::varint;

/// Default cap on the payload of a fixed-content frame.
pub const DEFAULT_MAX_FIXED_PAYLOAD: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingType,
    AwaitingLength { frame_type: u64 },
    AwaitingPushId { length: u64 },
    FixedPayload { frame_type: u64, length: u64 },
    Draining,
    Failed,
}

/// Per-stream frame decoder. Single writer; no internal locking.
#[derive(Debug)]
pub struct FrameDecoder {
    backlog: VecDeque<Bytes>,
    buffered: usize,
    state: State,
    current: Option<Frame>,
    remaining: u64,
    eof: bool,
    max_fixed_payload: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_fixed_payload(DEFAULT_MAX_FIXED_PAYLOAD)
    }

    pub fn with_config(config: &H3Config) -> Self {
        Self::with_max_fixed_payload(config.max_fixed_frame_payload)
    }

    pub fn with_max_fixed_payload(max_fixed_payload: u64) -> Self {
        Self {
            backlog: VecDeque::new(),
            buffered: 0,
            state: State::AwaitingType,
            current: None,
            remaining: 0,
            eof: false,
            max_fixed_payload,
        }
    }

    /// Append stream bytes. Parsing happens on the next [`poll`](Self::poll).
    pub fn submit(&mut self, data: Bytes) {
        if data.is_empty() || self.state == State::Failed {
            return;
        }
        self.buffered += data.len();
        self.backlog.push_back(data);
    }

    /// Record that the stream has ended.
    pub fn submit_eof(&mut self) {
        self.eof = true;
    }

    /// Number of bytes submitted but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Payload bytes of the current streaming frame not yet drained.
    pub fn remaining_payload(&self) -> u64 {
        if self.state == State::Draining {
            self.remaining
        } else {
            0
        }
    }

    /// True once EOF was submitted and every byte before it was consumed.
    pub fn eof(&self) -> bool {
        self.eof && self.buffered == 0 && self.state == State::AwaitingType && self.current.is_none()
    }

    /// Advance as far as the buffered bytes allow.
    ///
    /// Returns the current frame, `None` if more bytes are needed, or a
    /// [`Frame::Malformed`] once decoding has failed. Streaming frames are
    /// returned again on every call until their payload is drained; fixed
    /// frames are returned once.
    pub fn poll(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                State::Failed => return self.current.clone(),
                State::Draining => {
                    if self.eof && self.buffered == 0 && self.remaining > 0 {
                        let reason = format!(
                            "stream ended with {} payload bytes outstanding",
                            self.remaining
                        );
                        return self.fail(ErrorCode::FrameError, reason);
                    }
                    return self.current.clone();
                }
                State::AwaitingType => {
                    if self.buffered == 0 {
                        return None;
                    }
                    match self.take_varint() {
                        Some(frame_type) => self.state = State::AwaitingLength { frame_type },
                        None => return self.truncated("frame type"),
                    }
                }
                State::AwaitingLength { frame_type } => {
                    let Some(length) = self.take_varint() else {
                        return self.truncated("frame length");
                    };
                    trace!(frame_type, length, "frame header");
                    match FrameKind::of(frame_type) {
                        FrameKind::Fixed if length > self.max_fixed_payload => {
                            let reason = format!(
                                "frame type 0x{:x} length {} exceeds limit {}",
                                frame_type, length, self.max_fixed_payload
                            );
                            return self.fail(ErrorCode::ExcessiveLoad, reason);
                        }
                        FrameKind::Fixed => {
                            self.state = State::FixedPayload { frame_type, length }
                        }
                        FrameKind::Streaming if frame_type == frame_type::PUSH_PROMISE => {
                            if length == 0 {
                                return self.fail(
                                    ErrorCode::FrameError,
                                    "PUSH_PROMISE without push ID",
                                );
                            }
                            self.state = State::AwaitingPushId { length };
                        }
                        FrameKind::Streaming => {
                            let frame = if varint::is_grease(frame_type) {
                                Frame::Reserved { frame_type, length }
                            } else {
                                match frame_type {
                                    frame_type::DATA => Frame::Data { length },
                                    frame_type::HEADERS => Frame::Headers { length },
                                    _ => Frame::Unknown { frame_type, length },
                                }
                            };
                            return self.start_streaming(frame, length);
                        }
                    }
                }
                State::AwaitingPushId { length } => {
                    let Some(width) = self.peek_first().map(varint::width_of) else {
                        return self.truncated("push ID");
                    };
                    if width as u64 > length {
                        let reason = format!(
                            "push ID of {} bytes exceeds PUSH_PROMISE length {}",
                            width, length
                        );
                        return self.fail(ErrorCode::FrameError, reason);
                    }
                    let Some(push_id) = self.take_varint() else {
                        return self.truncated("push ID");
                    };
                    let length = length - width as u64;
                    return self.start_streaming(Frame::PushPromise { push_id, length }, length);
                }
                State::FixedPayload { frame_type, length } => {
                    let length = length as usize;
                    if self.buffered < length {
                        return self.truncated("frame payload");
                    }
                    let payload = self.take_bytes(length);
                    return match parse_fixed(frame_type, &payload) {
                        Ok(frame) => {
                            trace!(?frame, "fixed frame");
                            self.state = State::AwaitingType;
                            self.current = None;
                            Some(frame)
                        }
                        Err(malformed) => self.fail(malformed.code, malformed.reason),
                    };
                }
            }
        }
    }

    /// Drain buffered payload bytes of the current streaming frame.
    ///
    /// Returns `None` when no streaming payload is outstanding (no current
    /// frame, or a fixed or malformed one). Otherwise returns the chunks
    /// buffered so far, possibly none. Draining the last byte clears the
    /// current frame.
    pub fn read_payload_bytes(&mut self) -> Option<Vec<Bytes>> {
        if self.state != State::Draining {
            return None;
        }
        let mut chunks = Vec::new();
        while self.remaining > 0 {
            let Some(front) = self.backlog.front_mut() else {
                break;
            };
            let take = front.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
            let chunk = front.split_to(take);
            if front.is_empty() {
                self.backlog.pop_front();
            }
            self.buffered -= take;
            self.remaining -= take as u64;
            chunks.push(chunk);
        }
        if self.remaining == 0 {
            self.state = State::AwaitingType;
            self.current = None;
        }
        Some(chunks)
    }

    fn start_streaming(&mut self, frame: Frame, length: u64) -> Option<Frame> {
        trace!(?frame, "streaming frame");
        self.remaining = length;
        self.state = State::Draining;
        self.current = Some(frame);
        self.current.clone()
    }

    fn truncated(&mut self, what: &str) -> Option<Frame> {
        if self.eof {
            self.fail(ErrorCode::FrameError, format!("stream ended inside {}", what))
        } else {
            None
        }
    }

    fn fail(&mut self, code: ErrorCode, reason: impl Into<String>) -> Option<Frame> {
        let malformed = MalformedFrame::new(code, reason);
        warn!(code = %malformed.code, reason = %malformed.reason, "malformed frame");
        self.state = State::Failed;
        self.backlog.clear();
        self.buffered = 0;
        self.remaining = 0;
        self.current = Some(Frame::Malformed(malformed));
        self.current.clone()
    }

    fn peek_first(&self) -> Option<u8> {
        self.backlog.front().map(|chunk| chunk[0])
    }

    /// Decode a varint spanning any number of backlog chunks; consumes nothing
    /// if it is not complete yet.
    fn take_varint(&mut self) -> Option<u64> {
        let width = varint::width_of(self.peek_first()?);
        if self.buffered < width {
            return None;
        }
        let bytes = self.take_bytes(width);
        varint::decode(&bytes).map(|(value, _)| value)
    }

    fn take_bytes(&mut self, mut len: usize) -> Bytes {
        if let Some(front) = self.backlog.front_mut() {
            if front.len() >= len {
                let bytes = front.split_to(len);
                if front.is_empty() {
                    self.backlog.pop_front();
                }
                self.buffered -= len;
                return bytes;
            }
        }
        let mut out = BytesMut::with_capacity(len);
        self.buffered -= len;
        while len > 0 {
            let Some(front) = self.backlog.front_mut() else {
                break;
            };
            let take = front.len().min(len);
            out.extend_from_slice(&front[..take]);
            front.advance(take);
            if front.is_empty() {
                self.backlog.pop_front();
            }
            len -= take;
        }
        out.freeze()
    }
}

fn parse_fixed(frame_type: u64, payload: &[u8]) -> Result<Frame, MalformedFrame> {
    if frame_type == frame_type::SETTINGS {
        return SettingsFrame::decode(payload)
            .map(Frame::Settings)
            .map_err(|e| MalformedFrame::new(e.code(), e.to_string()));
    }
    let (value, used) = varint::decode(payload).ok_or_else(|| {
        MalformedFrame::new(
            ErrorCode::FrameError,
            format!("truncated payload in frame type 0x{:x}", frame_type),
        )
    })?;
    if used != payload.len() {
        return Err(MalformedFrame::new(
            ErrorCode::FrameError,
            format!(
                "frame type 0x{:x} has {} trailing bytes",
                frame_type,
                payload.len() - used
            ),
        ));
    }
    Ok(match frame_type {
        frame_type::CANCEL_PUSH => Frame::CancelPush { push_id: value },
        frame_type::GOAWAY => Frame::GoAway { id: value },
        _ => Frame::MaxPushId { push_id: value },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_with(bytes: &'static [u8]) -> FrameDecoder {
        let mut decoder = FrameDecoder::new();
        decoder.submit(Bytes::from_static(bytes));
        decoder
    }

    #[test]
    fn test_headers_end_to_end() {
        let mut decoder = decoder_with(&[1, 2, 0, 0]);
        let frame = decoder.poll().unwrap();
        assert_eq!(frame, Frame::Headers { length: 2 });
        assert_eq!(frame.streaming_length(), 2);

        let chunks = decoder.read_payload_bytes().unwrap();
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 2);

        assert_eq!(decoder.poll(), None);
        assert!(!decoder.eof());
        decoder.submit_eof();
        assert!(decoder.eof());
    }

    #[test]
    fn test_poll_is_idempotent_until_drained() {
        let mut decoder = decoder_with(&[0, 3, b'a', b'b']);
        let first = decoder.poll();
        assert_eq!(first, decoder.poll());
        assert_eq!(decoder.remaining_payload(), 3);

        let chunks = decoder.read_payload_bytes().unwrap();
        assert_eq!(chunks.concat(), b"ab");
        assert_eq!(decoder.poll(), first);
        assert_eq!(decoder.read_payload_bytes().unwrap(), Vec::<Bytes>::new());

        decoder.submit(Bytes::from_static(b"c"));
        assert_eq!(decoder.read_payload_bytes().unwrap().concat(), b"c");
        assert_eq!(decoder.poll(), None);
    }

    #[test]
    fn test_cancel_push_trailing_byte() {
        let mut decoder = decoder_with(&[3, 2, 0, 0]);
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, ErrorCode::FrameError),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        // terminal
        assert!(decoder.poll().unwrap().is_malformed());
        assert_eq!(decoder.read_payload_bytes(), None);
    }

    #[test]
    fn test_reserved_setting_is_settings_error() {
        let mut decoder = decoder_with(&[4, 2, 4, 0]);
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, ErrorCode::SettingsError),
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_frame_returned_once() {
        let mut decoder = decoder_with(&[7, 1, 4]);
        let frame = decoder.poll().unwrap();
        assert_eq!(frame, Frame::GoAway { id: 4 });
        assert_eq!(frame.streaming_length(), 0);
        assert_eq!(decoder.read_payload_bytes(), None);
        assert_eq!(decoder.poll(), None);
    }

    #[test]
    fn test_fixed_payload_limit() {
        let mut decoder = FrameDecoder::with_max_fixed_payload(4);
        decoder.submit(Bytes::from_static(&[4, 5]));
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, ErrorCode::ExcessiveLoad),
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_push_promise_consumes_push_id() {
        let mut decoder = decoder_with(&[5, 3, 0x40, 0x46, 0xaa]);
        let frame = decoder.poll().unwrap();
        assert_eq!(
            frame,
            Frame::PushPromise {
                push_id: 70,
                length: 1
            }
        );
        assert_eq!(decoder.read_payload_bytes().unwrap().concat(), &[0xaau8]);
    }

    #[test]
    fn test_push_id_wider_than_frame() {
        let mut decoder = decoder_with(&[5, 1, 0x40, 0x46]);
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, ErrorCode::FrameError),
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_eof_inside_header() {
        let mut decoder = decoder_with(&[0x40]);
        assert_eq!(decoder.poll(), None);
        decoder.submit_eof();
        assert!(decoder.poll().unwrap().is_malformed());
        assert!(!decoder.eof());
    }

    #[test]
    fn test_eof_inside_streaming_payload() {
        let mut decoder = decoder_with(&[0, 4, 1]);
        decoder.poll().unwrap();
        decoder.read_payload_bytes().unwrap();
        decoder.submit_eof();
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, ErrorCode::FrameError),
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_varint_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        // MAX_PUSH_ID carrying an 8-byte push id, split mid-varint.
        decoder.submit(Bytes::from_static(&[0x0d, 0x08, 0xc0, 0, 0]));
        assert_eq!(decoder.poll(), None);
        decoder.submit(Bytes::from_static(&[0, 0, 0, 0, 9]));
        assert_eq!(decoder.poll(), Some(Frame::MaxPushId { push_id: 9 }));
        assert_eq!(decoder.buffered(), 0);
    }
}
