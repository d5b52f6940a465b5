//! Connection-level HTTP/3 state machine.
//!
//! [`H3Connection`] owns everything that is scoped to one QUIC connection:
//! the dispatcher for each peer unidirectional stream, the registry of the
//! peer's critical streams, the peer control stream, a frame decoder per
//! request or push stream, and the shared [`PushManager`]. The transport feeds
//! stream bytes in; decoded messages and state changes are queued as
//! [`H3Event`]s and drained with [`H3Connection::poll_event`].
//!
//! Any protocol violation closes the connection once. The error is returned
//! to the caller, who sends CONNECTION_CLOSE with [`Error::code`]; every later
//! call fails with [`Error::ConnectionClosed`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::H3Config;
use crate::decoder::FrameDecoder;
use crate::error::{Error, ErrorCode, Result};
use crate::frame::{self, Frame};
use crate::push::{PromiseOutcome, PushIdRequest, PushManager, PushStreamOutcome};
use crate::qpack::{HeaderField, QpackCodec};
use crate::settings::{ConnectionSettings, SettingsFrame};
use crate::stream_type::{self, Dispatched, StreamRole, StreamType, StreamTypeDispatcher};
use crate::{Side, StreamId};

/// Reserved setting sent when greasing is enabled.
const GREASE_SETTING_ID: u64 = 0x1f * 42 + 0x21;

/// Something the application needs to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H3Event {
    /// The peer's SETTINGS arrived.
    PeerSettings(ConnectionSettings),
    /// A field section (request, response or trailers) was decoded.
    Headers {
        stream_id: StreamId,
        fields: Vec<HeaderField>,
    },
    /// Body bytes on a request or push stream.
    Data { stream_id: StreamId, data: Bytes },
    /// The stream ended cleanly after its last frame.
    Finished { stream_id: StreamId },
    /// A new push promise on request stream `stream_id`.
    PushPromise {
        stream_id: StreamId,
        push_id: u64,
        fields: Vec<HeaderField>,
    },
    /// A repeated promise for a push ID already seen.
    AdditionalPushPromise { stream_id: StreamId, push_id: u64 },
    /// A push stream carrying the response for `push_id` was opened.
    PushStream {
        stream_id: StreamId,
        push_id: u64,
        outcome: PushStreamOutcome,
    },
    /// The peer cancelled a push.
    PushCancelled { push_id: u64 },
    /// The peer sent GOAWAY.
    GoAway { id: u64 },
    /// The peer opened a stream of a reserved or unknown type; it is ignored.
    IgnoredStream { stream_id: StreamId, stream_type: u64 },
    /// The connection was closed because of a protocol violation.
    Closed { code: ErrorCode, reason: String },
}

/// Peer unidirectional stream state. Entries are dropped once a stream
/// other than a critical one ends or is reset.
#[derive(Debug)]
enum UniStream {
    Dispatching(StreamTypeDispatcher),
    Dispatched(StreamRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Request,
    Push { push_id: u64 },
}

/// Frame reader for a request stream or a push stream.
#[derive(Debug)]
struct MessageReader {
    decoder: FrameDecoder,
    kind: MessageKind,
    section: Option<BytesMut>,
}

#[derive(Debug)]
struct ControlReader {
    decoder: FrameDecoder,
    settings: Option<ConnectionSettings>,
}

/// HTTP/3 connection state for one side of a QUIC connection.
pub struct H3Connection<Q: QpackCodec> {
    side: Side,
    config: H3Config,
    qpack: Q,
    push: Arc<PushManager>,
    uni_streams: HashMap<StreamId, UniStream>,
    critical: HashMap<StreamType, StreamId>,
    control: ControlReader,
    messages: HashMap<StreamId, MessageReader>,
    events: VecDeque<H3Event>,
    local_goaway: Option<u64>,
    closed: Option<ErrorCode>,
}

impl<Q: QpackCodec> H3Connection<Q> {
    pub fn new(side: Side, config: H3Config, qpack: Q) -> Self {
        let control = ControlReader {
            decoder: FrameDecoder::with_config(&config),
            settings: None,
        };
        Self {
            side,
            config,
            qpack,
            push: Arc::new(PushManager::new()),
            uni_streams: HashMap::new(),
            critical: HashMap::new(),
            control,
            messages: HashMap::new(),
            events: VecDeque::new(),
            local_goaway: None,
            closed: None,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn config(&self) -> &H3Config {
        &self.config
    }

    /// Push state shared with the exchanges on this connection.
    pub fn push_manager(&self) -> &Arc<PushManager> {
        &self.push
    }

    /// The peer's settings, once its control stream delivered them.
    pub fn peer_settings(&self) -> Option<&ConnectionSettings> {
        self.control.settings.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Code the connection was closed with, if it was.
    pub fn close_code(&self) -> Option<ErrorCode> {
        self.closed
    }

    /// Next queued event.
    pub fn poll_event(&mut self) -> Option<H3Event> {
        self.events.pop_front()
    }

    /// Bytes that open the local control stream: stream type, SETTINGS and,
    /// for a client granting push, MAX_PUSH_ID.
    pub fn control_stream_preface(&mut self) -> Result<Bytes> {
        self.ensure_open()?;
        let mut buf = BytesMut::new();
        stream_type::write_stream_type(StreamType::Control, &mut buf)?;

        let mut settings = self.config.local_settings().to_frame();
        if self.config.send_grease_settings {
            settings.set(GREASE_SETTING_ID, 0);
        }
        frame::write_frame(&Frame::Settings(settings), &mut buf)?;

        if self.side == Side::Client && self.config.enable_server_push {
            if let Some(max_push_id) = self.push.grant_max_push_id(self.config.max_push_id) {
                frame::write_frame(&max_push_id, &mut buf)?;
            }
        }
        Ok(buf.freeze())
    }

    /// Bytes that open the local QPACK encoder or decoder stream.
    pub fn qpack_stream_preface(&self, stream_type: StreamType) -> Result<Bytes> {
        if !matches!(stream_type, StreamType::QpackEncoder | StreamType::QpackDecoder) {
            return Err(Error::protocol(
                ErrorCode::InternalError,
                format!("{:?} is not a QPACK stream type", stream_type),
            ));
        }
        let mut buf = BytesMut::new();
        stream_type::write_stream_type(stream_type, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode a HEADERS frame for `stream_id`.
    pub fn encode_headers(&mut self, stream_id: StreamId, fields: &[HeaderField]) -> Result<Bytes> {
        self.ensure_open()?;
        let section = self.qpack.encode_field_section(stream_id, fields)?;
        let mut buf = BytesMut::with_capacity(section.len() + 16);
        frame::write_headers(&section, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Server: encode a PUSH_PROMISE on request stream `stream_id`.
    ///
    /// Returns the push ID used and the frame bytes.
    pub fn encode_push_promise(
        &mut self,
        stream_id: StreamId,
        request: PushIdRequest,
        fields: &[HeaderField],
    ) -> Result<(u64, Bytes)> {
        self.ensure_open()?;
        if self.side != Side::Server {
            return Err(Error::protocol(
                ErrorCode::InternalError,
                "only a server sends PUSH_PROMISE",
            ));
        }
        let section = self.qpack.encode_field_section(stream_id, fields)?;
        let outcome = self
            .push
            .register_promise(request, section.clone(), stream_id.0)?;
        let push_id = outcome.push_id();
        let mut buf = BytesMut::with_capacity(section.len() + 16);
        frame::write_push_promise_header(push_id, section.len() as u64, &mut buf)?;
        buf.extend_from_slice(&section);
        Ok((push_id, buf.freeze()))
    }

    /// Server: preface of the push stream delivering `push_id`.
    pub fn push_stream_preface(&self, push_id: u64) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        stream_type::write_push_stream_header(push_id, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Client: raise the push grant. Returns the MAX_PUSH_ID frame to send on
    /// the control stream, if the grant changed.
    pub fn grant_max_push_id(&mut self, bound: u64) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        if self.side != Side::Client {
            return Err(Error::protocol(
                ErrorCode::InternalError,
                "only a client sends MAX_PUSH_ID",
            ));
        }
        let Some(frame) = self.push.grant_max_push_id(bound) else {
            return Ok(None);
        };
        let mut buf = BytesMut::new();
        frame::write_frame(&frame, &mut buf)?;
        Ok(Some(buf.freeze()))
    }

    /// Cancel a push locally. Returns the CANCEL_PUSH frame to send, or
    /// `None` if the push was already finished or cancelled.
    pub fn cancel_push(&mut self, push_id: u64) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        if !self.push.cancel(push_id) {
            return Ok(None);
        }
        encode_cancel_push(push_id).map(Some)
    }

    /// The exchange on `request_stream` no longer wants a push it observed.
    /// Returns the CANCEL_PUSH frame to send once no exchange still wants
    /// the push.
    pub fn dismiss_push(&mut self, push_id: u64, request_stream: StreamId) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        if !self.push.dismiss(push_id, request_stream.0) {
            return Ok(None);
        }
        encode_cancel_push(push_id).map(Some)
    }

    /// Peer unidirectional streams with live state.
    pub fn tracked_uni_streams(&self) -> usize {
        self.uni_streams.len()
    }

    /// Encode a GOAWAY frame. Successive ids must not increase.
    pub fn encode_goaway(&mut self, id: u64) -> Result<Bytes> {
        self.ensure_open()?;
        if let Some(previous) = self.local_goaway {
            if id > previous {
                return Err(Error::protocol(
                    ErrorCode::InternalError,
                    format!("GOAWAY id {} greater than previously sent {}", id, previous),
                ));
            }
        }
        self.local_goaway = Some(id);
        let mut buf = BytesMut::new();
        frame::write_frame(&Frame::GoAway { id }, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Bytes received on a peer-initiated unidirectional stream.
    pub fn on_uni_stream_data(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        self.ensure_open()?;
        let result = self.handle_uni(stream_id, data, fin);
        result.map_err(|e| self.fail(e))
    }

    /// A peer unidirectional stream was reset.
    pub fn on_uni_stream_reset(&mut self, stream_id: StreamId, error_code: u64) -> Result<()> {
        self.ensure_open()?;
        let result = self.handle_uni_reset(stream_id, error_code);
        result.map_err(|e| self.fail(e))
    }

    /// Bytes received on a bidirectional request stream.
    ///
    /// On a server these are request frames, on a client response frames.
    pub fn on_request_stream_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let result = self.handle_request(stream_id, data, fin);
        result.map_err(|e| self.fail(e))
    }

    /// A request stream was reset; its reader is dropped.
    pub fn on_request_stream_reset(&mut self, stream_id: StreamId) {
        if self.messages.remove(&stream_id).is_some() {
            debug!(stream_id = stream_id.0, "request stream reset");
        }
        self.push.unsubscribe(stream_id.0);
    }

    /// Close the connection locally.
    pub fn close(&mut self, code: ErrorCode, reason: impl Into<String>) {
        if self.closed.is_some() {
            return;
        }
        let reason = reason.into();
        debug!(%code, %reason, "closing connection");
        self.closed = Some(code);
        self.push.close();
        self.events.push_back(H3Event::Closed { code, reason });
    }

    fn ensure_open(&self) -> Result<()> {
        match self.closed {
            Some(code) => Err(Error::ConnectionClosed { code }),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        if err.is_protocol_violation() && self.closed.is_none() {
            warn!(code = %err.code(), error = %err, "connection error");
            self.close(err.code(), err.to_string());
        }
        err
    }

    fn handle_uni(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        if !stream_id.is_unidirectional() || !stream_id.is_initiated_by(self.side.peer()) {
            return Err(Error::protocol(
                ErrorCode::StreamCreationError,
                format!("stream {} is not a peer unidirectional stream", stream_id),
            ));
        }
        let dispatcher = match self
            .uni_streams
            .entry(stream_id)
            .or_insert_with(|| UniStream::Dispatching(StreamTypeDispatcher::new(stream_id)))
        {
            UniStream::Dispatched(role) => {
                let role = *role;
                return self.route_uni_until_fin(stream_id, role, data, fin);
            }
            UniStream::Dispatching(dispatcher) => dispatcher,
        };

        match dispatcher.on_data(data) {
            Some(Dispatched {
                role, remainder, ..
            }) => {
                self.uni_streams
                    .insert(stream_id, UniStream::Dispatched(role));
                self.register_uni_role(stream_id, role)?;
                self.route_uni_until_fin(stream_id, role, remainder, fin)
            }
            None => {
                if fin {
                    dispatcher.on_finished();
                    self.uni_streams.remove(&stream_id);
                }
                Ok(())
            }
        }
    }

    /// Critical streams fail on FIN inside `route_uni`; any other stream is
    /// forgotten once it ends.
    fn route_uni_until_fin(
        &mut self,
        stream_id: StreamId,
        role: StreamRole,
        data: Bytes,
        fin: bool,
    ) -> Result<()> {
        self.route_uni(stream_id, role, data, fin)?;
        if fin {
            self.uni_streams.remove(&stream_id);
        }
        Ok(())
    }

    fn register_uni_role(&mut self, stream_id: StreamId, role: StreamRole) -> Result<()> {
        match role {
            StreamRole::Control | StreamRole::QpackEncoder | StreamRole::QpackDecoder => {
                let stream_type = role.stream_type();
                if let Some(existing) = self.critical.get(&stream_type) {
                    return Err(Error::protocol(
                        ErrorCode::StreamCreationError,
                        format!(
                            "{:?} stream {} already created as stream {}",
                            stream_type, stream_id, existing
                        ),
                    ));
                }
                self.critical.insert(stream_type, stream_id);
                Ok(())
            }
            StreamRole::Push { push_id } => {
                if self.side == Side::Server {
                    return Err(Error::protocol(
                        ErrorCode::StreamCreationError,
                        format!("Push Stream {} opened by client", stream_id),
                    ));
                }
                let outcome = self.push.register_push_stream(push_id, stream_id)?;
                self.events.push_back(H3Event::PushStream {
                    stream_id,
                    push_id,
                    outcome,
                });
                if outcome != PushStreamOutcome::Cancelled {
                    self.messages.insert(
                        stream_id,
                        MessageReader {
                            decoder: FrameDecoder::with_config(&self.config),
                            kind: MessageKind::Push { push_id },
                            section: None,
                        },
                    );
                }
                Ok(())
            }
            StreamRole::Reserved(code) | StreamRole::Unknown(code) => {
                trace!(stream_id = stream_id.0, stream_type = code, "ignoring uni stream");
                self.events.push_back(H3Event::IgnoredStream {
                    stream_id,
                    stream_type: code,
                });
                Ok(())
            }
        }
    }

    fn route_uni(&mut self, stream_id: StreamId, role: StreamRole, data: Bytes, fin: bool) -> Result<()> {
        match role {
            StreamRole::Control => {
                self.control.decoder.submit(data);
                self.read_control()?;
                if fin {
                    return Err(closed_critical(stream_id, "control"));
                }
                Ok(())
            }
            StreamRole::QpackEncoder => {
                if !data.is_empty() {
                    self.qpack.on_encoder_stream_data(&data)?;
                }
                if fin {
                    return Err(closed_critical(stream_id, "QPACK encoder"));
                }
                Ok(())
            }
            StreamRole::QpackDecoder => {
                if !data.is_empty() {
                    self.qpack.on_decoder_stream_data(&data)?;
                }
                if fin {
                    return Err(closed_critical(stream_id, "QPACK decoder"));
                }
                Ok(())
            }
            StreamRole::Push { .. } => {
                if !self.messages.contains_key(&stream_id) {
                    // Cancelled push; the bytes are discarded.
                    return Ok(());
                }
                self.on_message_data(stream_id, data, fin)
            }
            StreamRole::Reserved(_) | StreamRole::Unknown(_) => Ok(()),
        }
    }

    fn handle_uni_reset(&mut self, stream_id: StreamId, error_code: u64) -> Result<()> {
        match self.uni_streams.remove(&stream_id) {
            Some(UniStream::Dispatched(role)) => match role {
                StreamRole::Control => Err(closed_critical(stream_id, "control")),
                StreamRole::QpackEncoder => Err(closed_critical(stream_id, "QPACK encoder")),
                StreamRole::QpackDecoder => Err(closed_critical(stream_id, "QPACK decoder")),
                StreamRole::Push { push_id } => {
                    debug!(stream_id = stream_id.0, push_id, error_code, "push stream reset");
                    self.messages.remove(&stream_id);
                    self.push.cancel(push_id);
                    Ok(())
                }
                StreamRole::Reserved(_) | StreamRole::Unknown(_) => Ok(()),
            },
            Some(UniStream::Dispatching(mut dispatcher)) => {
                dispatcher.on_finished();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read_control(&mut self) -> Result<()> {
        loop {
            let Some(frame) = self.control.decoder.poll() else {
                return Ok(());
            };
            if let Frame::Malformed(malformed) = &frame {
                return Err(malformed.to_error());
            }
            if self.control.settings.is_none() {
                let Frame::Settings(settings) = &frame else {
                    return Err(Error::protocol(
                        ErrorCode::MissingSettings,
                        format!("first control frame is {:?}, not SETTINGS", frame),
                    ));
                };
                self.on_settings(settings)?;
                continue;
            }
            if !frame.is_allowed_on_control_stream() {
                return Err(Error::protocol(
                    ErrorCode::FrameUnexpected,
                    format!("{:?} not allowed on control stream", frame),
                ));
            }
            match frame {
                Frame::Settings(_) => {
                    return Err(Error::protocol(
                        ErrorCode::FrameUnexpected,
                        "second SETTINGS frame on control stream",
                    ))
                }
                Frame::GoAway { id } => {
                    if self.side == Side::Client
                        && !(StreamId(id).is_client_initiated() && StreamId(id).is_bidirectional())
                    {
                        return Err(Error::protocol(
                            ErrorCode::IdError,
                            format!("GOAWAY id {} is not a client request stream", id),
                        ));
                    }
                    self.push.record_goaway(id)?;
                    debug!(id, "GOAWAY received");
                    self.events.push_back(H3Event::GoAway { id });
                }
                Frame::MaxPushId { push_id } => {
                    if self.side == Side::Client {
                        return Err(Error::protocol(
                            ErrorCode::FrameUnexpected,
                            "MAX_PUSH_ID received by client",
                        ));
                    }
                    self.push.on_max_push_id(push_id)?;
                }
                Frame::CancelPush { push_id } => {
                    self.push.on_cancel_push(push_id)?;
                    self.events.push_back(H3Event::PushCancelled { push_id });
                }
                Frame::Reserved { .. } | Frame::Unknown { .. } => {
                    self.control.decoder.read_payload_bytes();
                    if self.control.decoder.remaining_payload() > 0 {
                        return Ok(());
                    }
                }
                other => {
                    return Err(Error::protocol(
                        ErrorCode::FrameUnexpected,
                        format!("{:?} not allowed on control stream", other),
                    ))
                }
            }
        }
    }

    fn on_settings(&mut self, frame: &SettingsFrame) -> Result<()> {
        let settings = ConnectionSettings::from_frame(frame)?;
        debug!(?settings, "peer SETTINGS");
        self.control.settings = Some(settings);
        self.events.push_back(H3Event::PeerSettings(settings));
        Ok(())
    }

    fn handle_request(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        if !stream_id.is_bidirectional() || !stream_id.is_client_initiated() {
            return Err(Error::protocol(
                ErrorCode::StreamCreationError,
                format!("stream {} is not a request stream", stream_id),
            ));
        }
        if !self.messages.contains_key(&stream_id) {
            self.messages.insert(
                stream_id,
                MessageReader {
                    decoder: FrameDecoder::with_config(&self.config),
                    kind: MessageKind::Request,
                    section: None,
                },
            );
        }
        self.on_message_data(stream_id, data, fin)
    }

    fn on_message_data(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        let Some(mut reader) = self.messages.remove(&stream_id) else {
            return Ok(());
        };
        reader.decoder.submit(data);
        if fin {
            reader.decoder.submit_eof();
        }
        self.read_message(stream_id, &mut reader)?;
        if fin && !reader.decoder.eof() {
            // Stream ended inside a frame payload.
            if let Some(Frame::Malformed(malformed)) = reader.decoder.poll() {
                return Err(malformed.to_error());
            }
        }

        if reader.decoder.eof() {
            trace!(stream_id = stream_id.0, "message stream finished");
            if let MessageKind::Push { push_id } = reader.kind {
                self.push.complete(push_id);
            }
            self.events.push_back(H3Event::Finished { stream_id });
        } else {
            self.messages.insert(stream_id, reader);
        }
        Ok(())
    }

    fn read_message(&mut self, stream_id: StreamId, reader: &mut MessageReader) -> Result<()> {
        loop {
            let Some(frame) = reader.decoder.poll() else {
                return Ok(());
            };
            if let Frame::Malformed(malformed) = &frame {
                return Err(malformed.to_error());
            }
            if !frame.is_allowed_on_request_stream() {
                return Err(Error::protocol(
                    ErrorCode::FrameUnexpected,
                    format!("{:?} not allowed on stream {}", frame, stream_id),
                ));
            }
            match frame {
                Frame::Data { .. } => {
                    for data in reader.decoder.read_payload_bytes().unwrap_or_default() {
                        if !data.is_empty() {
                            self.events.push_back(H3Event::Data { stream_id, data });
                        }
                    }
                    if reader.decoder.remaining_payload() > 0 {
                        return Ok(());
                    }
                }
                Frame::Headers { length } => {
                    let Some(section) = self.collect_section(reader, length)? else {
                        return Ok(());
                    };
                    let fields = self.qpack.decode_field_section(stream_id, &section)?;
                    self.events.push_back(H3Event::Headers { stream_id, fields });
                }
                Frame::PushPromise { push_id, length } => {
                    if self.side == Side::Server || reader.kind != MessageKind::Request {
                        return Err(Error::protocol(
                            ErrorCode::FrameUnexpected,
                            format!("PUSH_PROMISE not allowed on stream {}", stream_id),
                        ));
                    }
                    let Some(section) = self.collect_section(reader, length)? else {
                        return Ok(());
                    };
                    self.on_push_promise(stream_id, push_id, section)?;
                }
                Frame::Reserved { .. } | Frame::Unknown { .. } => {
                    reader.decoder.read_payload_bytes();
                    if reader.decoder.remaining_payload() > 0 {
                        return Ok(());
                    }
                }
                other => {
                    return Err(Error::protocol(
                        ErrorCode::FrameUnexpected,
                        format!("{:?} not allowed on stream {}", other, stream_id),
                    ))
                }
            }
        }
    }

    /// Accumulate an encoded field section; `None` until all of it arrived.
    fn collect_section(&self, reader: &mut MessageReader, length: u64) -> Result<Option<Bytes>> {
        let limit = self.config.max_field_section_size;
        if limit != 0 && length > limit {
            return Err(Error::protocol(
                ErrorCode::ExcessiveLoad,
                format!("field section of {} bytes exceeds limit {}", length, limit),
            ));
        }
        let section = reader
            .section
            .get_or_insert_with(|| BytesMut::with_capacity(length.min(4096) as usize));
        for chunk in reader.decoder.read_payload_bytes().unwrap_or_default() {
            section.extend_from_slice(&chunk);
        }
        if (section.len() as u64) < length {
            return Ok(None);
        }
        Ok(reader.section.take().map(BytesMut::freeze))
    }

    fn on_push_promise(&mut self, stream_id: StreamId, push_id: u64, section: Bytes) -> Result<()> {
        if !self.config.enable_server_push {
            return Err(Error::protocol(
                ErrorCode::IdError,
                format!("PUSH_PROMISE {} received with push disabled", push_id),
            ));
        }
        let outcome = self
            .push
            .register_promise(PushIdRequest::Id(push_id), section.clone(), stream_id.0)?;
        match outcome {
            PromiseOutcome::New(_) => {
                let fields = self.qpack.decode_field_section(stream_id, &section)?;
                self.events.push_back(H3Event::PushPromise {
                    stream_id,
                    push_id,
                    fields,
                });
            }
            PromiseOutcome::Additional(_) => {
                self.events
                    .push_back(H3Event::AdditionalPushPromise { stream_id, push_id });
            }
        }
        Ok(())
    }
}

fn encode_cancel_push(push_id: u64) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    frame::write_frame(&Frame::CancelPush { push_id }, &mut buf)?;
    Ok(buf.freeze())
}

fn closed_critical(stream_id: StreamId, what: &str) -> Error {
    Error::protocol(
        ErrorCode::ClosedCriticalStream,
        format!("{} stream {} closed", what, stream_id),
    )
}
