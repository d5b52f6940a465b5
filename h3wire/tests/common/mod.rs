//! Shared helpers for the h3wire integration tests.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use h3wire::varint;
use h3wire::{HeaderField, QpackCodec, QpackError, StreamId};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Literal-only field section codec: each field is written as
/// `name_len name value_len value`. A section starting with 0xff fails to
/// decode.
#[derive(Debug, Default)]
pub struct LiteralQpack {
    pub encoder_stream: Vec<u8>,
    pub decoder_stream: Vec<u8>,
}

pub const UNDECODABLE: u8 = 0xff;

impl QpackCodec for LiteralQpack {
    fn encode_field_section(
        &mut self,
        _stream_id: StreamId,
        fields: &[HeaderField],
    ) -> Result<Bytes, QpackError> {
        Ok(encode_literal(fields))
    }

    fn decode_field_section(
        &mut self,
        _stream_id: StreamId,
        mut encoded: &[u8],
    ) -> Result<Vec<HeaderField>, QpackError> {
        if encoded.first() == Some(&UNDECODABLE) {
            return Err(QpackError::Decompression("invalid prefix".into()));
        }
        let mut fields = Vec::new();
        while !encoded.is_empty() {
            let name = take_string(&mut encoded)?;
            let value = take_string(&mut encoded)?;
            fields.push(HeaderField::new(name, value));
        }
        Ok(fields)
    }

    fn on_encoder_stream_data(&mut self, data: &[u8]) -> Result<(), QpackError> {
        if data.contains(&UNDECODABLE) {
            return Err(QpackError::EncoderStream("bad instruction".into()));
        }
        self.encoder_stream.extend_from_slice(data);
        Ok(())
    }

    fn on_decoder_stream_data(&mut self, data: &[u8]) -> Result<(), QpackError> {
        self.decoder_stream.extend_from_slice(data);
        Ok(())
    }
}

pub fn encode_literal(fields: &[HeaderField]) -> Bytes {
    let mut buf = BytesMut::new();
    for field in fields {
        buf.put_u8(field.name.len() as u8);
        buf.put_slice(&field.name);
        buf.put_u8(field.value.len() as u8);
        buf.put_slice(&field.value);
    }
    buf.freeze()
}

fn take_string(encoded: &mut &[u8]) -> Result<Bytes, QpackError> {
    let (&len, rest) = encoded
        .split_first()
        .ok_or_else(|| QpackError::Decompression("truncated field".into()))?;
    let len = len as usize;
    if rest.len() < len {
        return Err(QpackError::Decompression("truncated field".into()));
    }
    let value = Bytes::copy_from_slice(&rest[..len]);
    *encoded = &rest[len..];
    Ok(value)
}

/// Encode a whole frame with an arbitrary payload.
pub fn raw_frame(frame_type: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    varint::encode_buf(frame_type, &mut buf).unwrap();
    varint::encode_buf(payload.len() as u64, &mut buf).unwrap();
    buf.put_slice(payload);
    buf.freeze()
}

pub fn request_fields() -> Vec<HeaderField> {
    vec![
        (":method", "GET").into(),
        (":scheme", "https").into(),
        (":authority", "example.com").into(),
        (":path", "/index.html").into(),
    ]
}
