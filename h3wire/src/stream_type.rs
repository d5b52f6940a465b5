//! Unidirectional stream type identification per RFC 9114 Section 6.2.
//!
//! Each unidirectional stream begins with a variable-length integer indicating
//! the stream type; push streams follow it with the push ID. Both may arrive
//! split across any number of reads, so [`StreamTypeDispatcher`] buffers them
//! and reports the stream's role exactly once.

use bytes::{BufMut, Bytes};
use tracing::{debug, trace};

use crate::error::Result;
use crate::varint::{self, PartialVarint};
use crate::StreamId;

/// Unidirectional stream types per RFC 9114 Section 6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Control stream (0x00) - RFC 9114 Section 6.2.1.
    /// Carries connection-level frames (SETTINGS, GOAWAY, etc.).
    Control,

    /// Push stream (0x01) - RFC 9114 Section 6.2.2.
    /// Carries server push responses.
    Push,

    /// QPACK encoder stream (0x02) - RFC 9204 Section 4.2.
    QpackEncoder,

    /// QPACK decoder stream (0x03) - RFC 9204 Section 4.2.
    QpackDecoder,

    /// Reserved (grease) stream type `0x1f * N + 0x21` - RFC 9114 Section 6.2.3.
    Reserved(u64),

    /// Any other unassigned type. The stream is ignored.
    Unknown(u64),
}

impl StreamType {
    pub fn from_u64(value: u64) -> Self {
        match value {
            0x00 => Self::Control,
            0x01 => Self::Push,
            0x02 => Self::QpackEncoder,
            0x03 => Self::QpackDecoder,
            v if varint::is_grease(v) => Self::Reserved(v),
            other => Self::Unknown(other),
        }
    }

    pub fn to_u64(&self) -> u64 {
        match self {
            Self::Control => 0x00,
            Self::Push => 0x01,
            Self::QpackEncoder => 0x02,
            Self::QpackDecoder => 0x03,
            Self::Reserved(v) | Self::Unknown(v) => *v,
        }
    }

    /// Control and QPACK streams: one per peer, never closed.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Control | Self::QpackEncoder | Self::QpackDecoder)
    }
}

/// Write stream type to the beginning of a unidirectional stream.
pub fn write_stream_type(stream_type: StreamType, buf: &mut impl BufMut) -> Result<usize> {
    varint::encode_buf(stream_type.to_u64(), buf)
}

/// Write the push stream preface: stream type 0x01 followed by the push ID.
pub fn write_push_stream_header(push_id: u64, buf: &mut impl BufMut) -> Result<usize> {
    let written = write_stream_type(StreamType::Push, buf)?;
    Ok(written + varint::encode_buf(push_id, buf)?)
}

/// Role of a peer-initiated unidirectional stream, known once its prefix has
/// been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Control,
    QpackEncoder,
    QpackDecoder,
    Push { push_id: u64 },
    Reserved(u64),
    Unknown(u64),
}

impl StreamRole {
    pub fn stream_type(&self) -> StreamType {
        match self {
            Self::Control => StreamType::Control,
            Self::QpackEncoder => StreamType::QpackEncoder,
            Self::QpackDecoder => StreamType::QpackDecoder,
            Self::Push { .. } => StreamType::Push,
            Self::Reserved(v) => StreamType::Reserved(*v),
            Self::Unknown(v) => StreamType::Unknown(*v),
        }
    }

    /// Reserved and unknown streams carry nothing the connection reads.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Reserved(_) | Self::Unknown(_))
    }
}

/// Outcome of the one-time dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub stream_id: StreamId,
    pub role: StreamRole,
    /// Bytes that followed the prefix in the same chunk; they belong to the
    /// role's consumer.
    pub remainder: Bytes,
}

#[derive(Debug)]
enum DispatchState {
    AwaitingType(PartialVarint),
    AwaitingPushId(PartialVarint),
    Dispatched(StreamRole),
    /// Stream ended before its prefix was complete.
    Abandoned,
}

/// Reads the type prefix of one peer-initiated unidirectional stream.
///
/// Single writer per stream. Once dispatched, further data must go straight
/// to the role's consumer; `on_data` returns `None` from then on.
#[derive(Debug)]
pub struct StreamTypeDispatcher {
    stream_id: StreamId,
    state: DispatchState,
}

impl StreamTypeDispatcher {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            state: DispatchState::AwaitingType(PartialVarint::new()),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// The dispatched role, if the prefix is complete.
    pub fn role(&self) -> Option<StreamRole> {
        match self.state {
            DispatchState::Dispatched(role) => Some(role),
            _ => None,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        self.role().is_some()
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.state, DispatchState::Abandoned)
    }

    /// Feed stream bytes; returns the dispatch result when the prefix
    /// completes.
    pub fn on_data(&mut self, mut data: Bytes) -> Option<Dispatched> {
        loop {
            match &mut self.state {
                DispatchState::AwaitingType(partial) => {
                    let code = partial.feed(&mut data)?;
                    let stream_type = StreamType::from_u64(code);
                    trace!(stream_id = self.stream_id.0, ?stream_type, "uni stream type");
                    let role = match stream_type {
                        StreamType::Push => {
                            self.state = DispatchState::AwaitingPushId(PartialVarint::new());
                            continue;
                        }
                        StreamType::Control => StreamRole::Control,
                        StreamType::QpackEncoder => StreamRole::QpackEncoder,
                        StreamType::QpackDecoder => StreamRole::QpackDecoder,
                        StreamType::Reserved(v) => StreamRole::Reserved(v),
                        StreamType::Unknown(v) => StreamRole::Unknown(v),
                    };
                    return Some(self.dispatch(role, data));
                }
                DispatchState::AwaitingPushId(partial) => {
                    let push_id = partial.feed(&mut data)?;
                    return Some(self.dispatch(StreamRole::Push { push_id }, data));
                }
                DispatchState::Dispatched(_) | DispatchState::Abandoned => return None,
            }
        }
    }

    /// Stream finished or was reset.
    ///
    /// Returns true if it ended before dispatch. This is not an error: the
    /// stream simply never had a role.
    pub fn on_finished(&mut self) -> bool {
        match self.state {
            DispatchState::AwaitingType(_) | DispatchState::AwaitingPushId(_) => {
                debug!(stream_id = self.stream_id.0, "uni stream ended before its type was known");
                self.state = DispatchState::Abandoned;
                true
            }
            _ => false,
        }
    }

    fn dispatch(&mut self, role: StreamRole, remainder: Bytes) -> Dispatched {
        debug!(stream_id = self.stream_id.0, ?role, "uni stream dispatched");
        self.state = DispatchState::Dispatched(role);
        Dispatched {
            stream_id: self.stream_id,
            role,
            remainder,
        }
    }
}
