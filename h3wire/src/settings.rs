//! SETTINGS frame payload (RFC 9114 Section 7.2.4).

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode, Result};
use crate::varint;

/// SETTINGS_QPACK_MAX_TABLE_CAPACITY (RFC 9204 Section 5).
pub const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
/// SETTINGS_MAX_FIELD_SECTION_SIZE (RFC 9114 Section 7.2.4.1).
pub const SETTINGS_MAX_FIELD_SECTION_SIZE: u64 = 0x06;
/// SETTINGS_QPACK_BLOCKED_STREAMS (RFC 9204 Section 5).
pub const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;
/// SETTINGS_ENABLE_CONNECT_PROTOCOL (RFC 9220).
pub const SETTINGS_ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
/// SETTINGS_H3_DATAGRAM (RFC 9297).
pub const SETTINGS_H3_DATAGRAM: u64 = 0x33;

/// Setting identifiers carried over from HTTP/2 that MUST NOT appear in
/// HTTP/3 (RFC 9114 Section 7.2.4.1).
const HTTP2_RESERVED_SETTINGS: &[u64] = &[0x00, 0x02, 0x03, 0x04, 0x05];

/// True for setting identifiers reserved by HTTP/2.
pub fn is_http2_reserved(id: u64) -> bool {
    HTTP2_RESERVED_SETTINGS.contains(&id)
}

/// Decoded SETTINGS frame: identifier/value pairs in wire order.
///
/// Grease identifiers are dropped while decoding. Other identifiers,
/// including unknown and repeated ones, are kept as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsFrame {
    entries: Vec<(u64, u64)>,
}

impl SettingsFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn set(&mut self, id: u64, value: u64) -> &mut Self {
        self.entries.push((id, value));
        self
    }

    /// Value of the last occurrence of `id`, if any.
    pub fn get(&self, id: u64) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| *v)
    }

    pub fn entries(&self) -> &[(u64, u64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte length of the encoded payload.
    pub fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(id, v)| varint::encoded_len(*id) + varint::encoded_len(*v))
            .sum()
    }

    /// Encode the payload (without frame header).
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        for (id, value) in &self.entries {
            varint::encode_buf(*id, buf)?;
            varint::encode_buf(*value, buf)?;
        }
        Ok(())
    }

    /// Decode a complete SETTINGS payload.
    ///
    /// # Errors
    ///
    /// `H3_SETTINGS_ERROR` for an HTTP/2 reserved identifier, `H3_FRAME_ERROR`
    /// if the payload ends inside an identifier or value.
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let mut settings = SettingsFrame::new();
        while payload.has_remaining() {
            let id = varint::decode_buf(&mut payload).ok_or_else(|| {
                Error::protocol(ErrorCode::FrameError, "truncated setting identifier")
            })?;
            let value = varint::decode_buf(&mut payload).ok_or_else(|| {
                Error::protocol(
                    ErrorCode::FrameError,
                    format!("truncated value for setting 0x{:x}", id),
                )
            })?;
            if is_http2_reserved(id) {
                return Err(Error::protocol(
                    ErrorCode::SettingsError,
                    format!("reserved HTTP/2 setting 0x{:x} received", id),
                ));
            }
            if varint::is_grease(id) {
                continue;
            }
            settings.entries.push((id, value));
        }
        Ok(settings)
    }
}

/// Connection-level view of the peer's (or our own) SETTINGS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub qpack_max_table_capacity: u64,
    /// `None` means unlimited.
    pub max_field_section_size: Option<u64>,
    pub qpack_blocked_streams: u64,
    pub enable_connect_protocol: bool,
    pub h3_datagram: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            qpack_max_table_capacity: 0,
            max_field_section_size: None,
            qpack_blocked_streams: 0,
            enable_connect_protocol: false,
            h3_datagram: false,
        }
    }
}

impl ConnectionSettings {
    /// Interpret a decoded SETTINGS frame; unknown identifiers are ignored.
    ///
    /// # Errors
    ///
    /// `H3_SETTINGS_ERROR` for boolean settings with values other than 0 or 1.
    pub fn from_frame(frame: &SettingsFrame) -> Result<Self> {
        let mut settings = ConnectionSettings::default();
        for &(id, value) in frame.entries() {
            match id {
                SETTINGS_QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                SETTINGS_MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = Some(value),
                SETTINGS_QPACK_BLOCKED_STREAMS => settings.qpack_blocked_streams = value,
                SETTINGS_ENABLE_CONNECT_PROTOCOL => {
                    settings.enable_connect_protocol = bool_setting(id, value)?
                }
                SETTINGS_H3_DATAGRAM => settings.h3_datagram = bool_setting(id, value)?,
                _ => {}
            }
        }
        Ok(settings)
    }

    /// Build the SETTINGS frame advertising these values.
    ///
    /// Defaults are omitted, as the peer assumes them anyway.
    pub fn to_frame(&self) -> SettingsFrame {
        let mut frame = SettingsFrame::new();
        if self.qpack_max_table_capacity != 0 {
            frame.set(SETTINGS_QPACK_MAX_TABLE_CAPACITY, self.qpack_max_table_capacity);
        }
        if let Some(size) = self.max_field_section_size {
            frame.set(SETTINGS_MAX_FIELD_SECTION_SIZE, size);
        }
        if self.qpack_blocked_streams != 0 {
            frame.set(SETTINGS_QPACK_BLOCKED_STREAMS, self.qpack_blocked_streams);
        }
        if self.enable_connect_protocol {
            frame.set(SETTINGS_ENABLE_CONNECT_PROTOCOL, 1);
        }
        if self.h3_datagram {
            frame.set(SETTINGS_H3_DATAGRAM, 1);
        }
        frame
    }
}

fn bool_setting(id: u64, value: u64) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::protocol(
            ErrorCode::SettingsError,
            format!("setting 0x{:x} must be 0 or 1, got {}", id, other),
        )),
    }
}
