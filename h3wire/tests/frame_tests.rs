//! Frame decoding tests: fragmentation, idempotent polling and malformed
//! input classification.

mod common;

use bytes::{Bytes, BytesMut};
use h3wire::frame::{self, frame_type, Frame};
use h3wire::settings::{SettingsFrame, SETTINGS_MAX_FIELD_SECTION_SIZE};
use h3wire::{ErrorCode, FrameDecoder};
use proptest::prelude::*;

use common::{init_tracing, raw_frame};

/// Poll every frame out of `decoder`, draining streaming payloads.
fn drain_all(decoder: &mut FrameDecoder) -> Vec<(Frame, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(frame) = decoder.poll() {
        if frame.is_malformed() {
            out.push((frame, Vec::new()));
            break;
        }
        let mut payload = Vec::new();
        if let Some(chunks) = decoder.read_payload_bytes() {
            for chunk in chunks {
                payload.extend_from_slice(&chunk);
            }
            if decoder.remaining_payload() > 0 {
                break;
            }
        }
        out.push((frame, payload));
    }
    out
}

fn sample_stream() -> Bytes {
    let mut buf = BytesMut::new();
    let mut settings = SettingsFrame::new();
    settings.set(SETTINGS_MAX_FIELD_SECTION_SIZE, 16384).set(0x21, 1);
    frame::write_frame(&Frame::Settings(settings), &mut buf).unwrap();
    frame::write_headers(b"\x00\x00\xd1\xd7", &mut buf).unwrap();
    frame::write_data(b"Hello, HTTP/3!", &mut buf).unwrap();
    frame::write_push_promise_header(7, 3, &mut buf).unwrap();
    buf.extend_from_slice(b"abc");
    frame::write_frame(&Frame::GoAway { id: 8 }, &mut buf).unwrap();
    frame::write_frame_header(0x40, 2, &mut buf).unwrap();
    buf.extend_from_slice(b"zz");
    frame::write_frame(&Frame::MaxPushId { push_id: 500 }, &mut buf).unwrap();
    frame::write_frame(&Frame::CancelPush { push_id: 42 }, &mut buf).unwrap();
    buf.freeze()
}

#[test]
fn test_headers_frame_end_to_end() {
    init_tracing();
    let mut decoder = FrameDecoder::new();
    decoder.submit(Bytes::from_static(&[1, 2, 0, 0]));

    let frame = decoder.poll().unwrap();
    assert_eq!(frame.streaming_length(), 2);

    let chunks = decoder.read_payload_bytes().unwrap();
    assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 2);
    assert_eq!(decoder.poll(), None);
    assert!(!decoder.eof());

    decoder.submit_eof();
    assert!(decoder.eof());
}

#[test]
fn test_multiple_frames_in_one_chunk() {
    let mut decoder = FrameDecoder::new();
    decoder.submit(sample_stream());
    let frames = drain_all(&mut decoder);

    let kinds: Vec<Option<u64>> = frames.iter().map(|(f, _)| f.frame_type()).collect();
    assert_eq!(
        kinds,
        vec![
            Some(frame_type::SETTINGS),
            Some(frame_type::HEADERS),
            Some(frame_type::DATA),
            Some(frame_type::PUSH_PROMISE),
            Some(frame_type::GOAWAY),
            Some(0x40),
            Some(frame_type::MAX_PUSH_ID),
            Some(frame_type::CANCEL_PUSH),
        ]
    );

    match &frames[0].0 {
        Frame::Settings(settings) => {
            // grease id 0x21 dropped
            assert_eq!(settings.entries(), &[(SETTINGS_MAX_FIELD_SECTION_SIZE, 16384)]);
        }
        other => panic!("expected SETTINGS, got {:?}", other),
    }
    assert_eq!(frames[2].1, b"Hello, HTTP/3!".to_vec());
    assert_eq!(
        frames[3],
        (
            Frame::PushPromise {
                push_id: 7,
                length: 3
            },
            b"abc".to_vec()
        )
    );
    assert_eq!(
        frames[5].0,
        Frame::Reserved {
            frame_type: 0x40,
            length: 2
        }
    );
    assert_eq!(frames[7].0, Frame::CancelPush { push_id: 42 });
}

#[test]
fn test_byte_at_a_time_matches_whole() {
    let stream = sample_stream();

    let mut whole = FrameDecoder::new();
    whole.submit(stream.clone());
    let expected = drain_all(&mut whole);

    let mut split = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut pending: Option<(Frame, Vec<u8>)> = None;
    for i in 0..stream.len() {
        split.submit(stream.slice(i..i + 1));
        while let Some(frame) = split.poll() {
            let entry = pending.get_or_insert_with(|| (frame.clone(), Vec::new()));
            assert_eq!(entry.0, frame, "poll must return the same frame until drained");
            if let Some(chunks) = split.read_payload_bytes() {
                for chunk in chunks {
                    entry.1.extend_from_slice(&chunk);
                }
                if split.remaining_payload() > 0 {
                    break;
                }
            }
            if let Some(done) = pending.take() {
                frames.push(done);
            }
        }
    }
    assert_eq!(frames, expected);
}

#[test]
fn test_streaming_header_surfaces_before_payload() {
    let mut decoder = FrameDecoder::new();
    decoder.submit(Bytes::from_static(&[0x00, 0x44, 0x00]));
    let frame = decoder.poll().unwrap();
    assert_eq!(frame, Frame::Data { length: 0x400 });
    assert_eq!(decoder.read_payload_bytes().unwrap(), Vec::<Bytes>::new());
    assert_eq!(decoder.poll(), Some(frame));
}

#[test]
fn test_fixed_content_completeness() {
    for bytes in [
        raw_frame(frame_type::CANCEL_PUSH, &[5]),
        raw_frame(frame_type::GOAWAY, &[0x40, 0x10]),
        raw_frame(frame_type::MAX_PUSH_ID, &[9]),
        raw_frame(frame_type::SETTINGS, &[0x06, 0x10]),
    ] {
        let mut decoder = FrameDecoder::new();
        decoder.submit(bytes);
        let frame = decoder.poll().unwrap();
        assert!(!frame.is_malformed(), "{:?}", frame);
        assert_eq!(frame.streaming_length(), 0);
        assert_eq!(decoder.read_payload_bytes(), None);
    }
}

#[test]
fn test_empty_settings_frame() {
    let mut decoder = FrameDecoder::new();
    decoder.submit(raw_frame(frame_type::SETTINGS, &[]));
    assert_eq!(
        decoder.poll(),
        Some(Frame::Settings(SettingsFrame::new()))
    );
}

#[test]
fn test_malformed_classification() {
    let cases: Vec<(Bytes, ErrorCode)> = vec![
        // CANCEL_PUSH with a trailing byte
        (Bytes::from_static(&[3, 2, 0, 0]), ErrorCode::FrameError),
        // SETTINGS naming reserved id 4
        (Bytes::from_static(&[4, 2, 4, 0]), ErrorCode::SettingsError),
        // GOAWAY whose id varint runs past the frame
        (Bytes::from_static(&[7, 1, 0x40, 0x01]), ErrorCode::FrameError),
        // MAX_PUSH_ID with an empty payload
        (Bytes::from_static(&[0x0d, 0]), ErrorCode::FrameError),
        // SETTINGS with a dangling identifier
        (Bytes::from_static(&[4, 1, 6]), ErrorCode::FrameError),
        // PUSH_PROMISE with no room for the push id
        (Bytes::from_static(&[5, 0]), ErrorCode::FrameError),
    ];
    for (bytes, code) in cases {
        let mut decoder = FrameDecoder::new();
        decoder.submit(bytes.clone());
        match decoder.poll() {
            Some(Frame::Malformed(m)) => assert_eq!(m.code, code, "input {:?}", bytes),
            other => panic!("input {:?}: expected malformed, got {:?}", bytes, other),
        }
    }
}

#[test]
fn test_h2_frame_types_decode_as_reserved_unknown() {
    let mut decoder = FrameDecoder::new();
    decoder.submit(raw_frame(0x08, &[0, 0, 0, 1]));
    let frame = decoder.poll().unwrap();
    assert_eq!(
        frame,
        Frame::Unknown {
            frame_type: 0x08,
            length: 4
        }
    );
    assert!(frame.is_http2_reserved());
}

#[test]
fn test_eof_after_complete_frames() {
    let mut decoder = FrameDecoder::new();
    decoder.submit(raw_frame(frame_type::GOAWAY, &[0]));
    decoder.submit_eof();
    assert!(!decoder.eof());
    assert_eq!(decoder.poll(), Some(Frame::GoAway { id: 0 }));
    assert_eq!(decoder.poll(), None);
    assert!(decoder.eof());
}

proptest! {
    #[test]
    fn proptest_data_split_anywhere(payload in proptest::collection::vec(any::<u8>(), 0..300), split in 0usize..400) {
        let mut buf = BytesMut::new();
        frame::write_data(&payload, &mut buf).unwrap();
        let bytes = buf.freeze();
        let split = split.min(bytes.len());

        let mut decoder = FrameDecoder::new();
        decoder.submit(bytes.slice(..split));
        let mut received = Vec::new();
        let mut header = decoder.poll();
        if header.is_some() {
            for chunk in decoder.read_payload_bytes().unwrap() {
                received.extend_from_slice(&chunk);
            }
        }
        decoder.submit(bytes.slice(split..));
        if header.is_none() || decoder.remaining_payload() > 0 {
            header = header.or_else(|| decoder.poll());
            if let Some(chunks) = decoder.read_payload_bytes() {
                for chunk in chunks {
                    received.extend_from_slice(&chunk);
                }
            }
        }
        prop_assert_eq!(header, Some(Frame::Data { length: payload.len() as u64 }));
        prop_assert_eq!(received, payload);
        prop_assert_eq!(decoder.poll(), None);
    }
}
