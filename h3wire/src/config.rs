//! HTTP/3 connection configuration and tunable parameters.
//!
//! Values here feed the local SETTINGS frame, the frame decoder limits and
//! the initial push grant. Operators tune them for memory or throughput.

use serde::{Deserialize, Serialize};

use crate::decoder::DEFAULT_MAX_FIXED_PAYLOAD;
use crate::settings::ConnectionSettings;
use crate::varint;

const MAX_FIXED_PAYLOAD_LIMIT: u64 = 1 << 20;

/// Per-connection HTTP/3 parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct H3Config {
    /// CANCEL_PUSH, SETTINGS, GOAWAY and MAX_PUSH_ID are buffered whole
    /// before parsing; a larger payload fails with H3_EXCESSIVE_LOAD.
    pub max_fixed_frame_payload: u64,

    /// Cap on an encoded HEADERS or PUSH_PROMISE field section, advertised
    /// as SETTINGS_MAX_FIELD_SECTION_SIZE. 0 leaves it unbounded.
    pub max_field_section_size: u64,

    /// SETTINGS_QPACK_MAX_TABLE_CAPACITY (RFC 9204 Section 5).
    pub qpack_max_table_capacity: u64,

    /// SETTINGS_QPACK_BLOCKED_STREAMS (RFC 9204 Section 5).
    pub qpack_blocked_streams: u64,

    /// Push grant a client sends in its first MAX_PUSH_ID. Push IDs strictly
    /// below it may be promised; 0 means no grant is sent.
    pub max_push_id: u64,

    /// Client side: accept PUSH_PROMISE at all.
    pub enable_server_push: bool,

    /// Advertise SETTINGS_ENABLE_CONNECT_PROTOCOL (RFC 9220).
    pub enable_connect_protocol: bool,

    /// Add one grease setting (`0x1f * N + 0x21`) to the local SETTINGS.
    pub send_grease_settings: bool,
}

impl Default for H3Config {
    fn default() -> Self {
        Self {
            max_fixed_frame_payload: DEFAULT_MAX_FIXED_PAYLOAD,
            max_field_section_size: 64 << 10,
            qpack_max_table_capacity: 4096,
            qpack_blocked_streams: 100,
            max_push_id: 0,
            enable_server_push: false,
            enable_connect_protocol: false,
            send_grease_settings: true,
        }
    }
}

impl H3Config {
    /// Large field sections and QPACK state, with a push grant of 100.
    pub fn high_throughput() -> Self {
        Self {
            max_fixed_frame_payload: 64 << 10,
            max_field_section_size: 256 << 10,
            qpack_max_table_capacity: 16 << 10,
            qpack_blocked_streams: 256,
            max_push_id: 100,
            enable_server_push: true,
            ..Self::default()
        }
    }

    /// Static-table-only QPACK and small buffers.
    pub fn low_memory() -> Self {
        Self {
            max_fixed_frame_payload: 1 << 10,
            max_field_section_size: 8 << 10,
            qpack_max_table_capacity: 0,
            qpack_blocked_streams: 0,
            ..Self::default()
        }
    }

    /// SETTINGS values advertised to the peer.
    pub fn local_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            qpack_max_table_capacity: self.qpack_max_table_capacity,
            max_field_section_size: (self.max_field_section_size != 0)
                .then_some(self.max_field_section_size),
            qpack_blocked_streams: self.qpack_blocked_streams,
            enable_connect_protocol: self.enable_connect_protocol,
            h3_datagram: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_fixed_frame_payload < 8 {
            return Err("max_fixed_frame_payload must hold at least one varint".into());
        }
        if self.max_fixed_frame_payload > MAX_FIXED_PAYLOAD_LIMIT {
            return Err(format!(
                "max_fixed_frame_payload {} exceeds {}",
                self.max_fixed_frame_payload, MAX_FIXED_PAYLOAD_LIMIT
            ));
        }
        if self.max_push_id > varint::MAX {
            return Err("max_push_id exceeds the varint range".into());
        }
        if self.max_push_id > 0 && !self.enable_server_push {
            return Err("max_push_id requires enable_server_push".into());
        }
        Ok(())
    }
}
