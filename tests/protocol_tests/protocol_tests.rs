//! Tests for the wire protocol
//!
//! These tests verify:
//! - Frame header decoding, including incomplete and invalid headers
//! - Frame encoding with zero padding to an expressible length
//! - Blocking frame I/O
//! - Envelope decoding (fatal errors) and parameter parsing (in-band errors)
//! - Response envelope conversion

use std::io::Cursor;

use shardkv::error::KvError;
use shardkv::protocol::{
    decode_header, encode_frame, read_frame, write_frame, BincodeCodec, Envelope, Request,
    Response, Value, ValueCodec, OP_GET, OP_QUERY,
};
use shardkv::query::{FilterOp, Query};

// =============================================================================
// Frame Header Tests
// =============================================================================

#[test]
fn test_header_single_byte() {
    assert_eq!(decode_header(&[0]).unwrap(), Some((1, 0)));
}

#[test]
fn test_header_includes_leading_byte_in_length() {
    // [1, 0x2c] reads as 0x012c
    assert_eq!(decode_header(&[1, 0x2c, 0xaa]).unwrap(), Some((2, 300)));
    assert_eq!(decode_header(&[2, 0, 0x10]).unwrap(), Some((3, 2 * 65536 + 16)));
}

#[test]
fn test_header_incomplete() {
    assert_eq!(decode_header(&[]).unwrap(), None);
    assert_eq!(decode_header(&[1]).unwrap(), None);
    assert_eq!(decode_header(&[3, 0, 0]).unwrap(), None);
}

#[test]
fn test_header_rejects_large_length_byte() {
    let err = decode_header(&[8, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();

    assert!(matches!(err, KvError::Protocol(_)));
}

// =============================================================================
// Frame Encoding Tests
// =============================================================================

#[test]
fn test_encode_empty_payload() {
    assert_eq!(encode_frame(&[]).unwrap(), vec![0]);
}

#[test]
fn test_encode_pads_short_payload() {
    let frame = encode_frame(b"abc").unwrap();

    // Smallest length a two-byte header can carry is 256
    assert_eq!(frame.len(), 2 + 256);
    assert_eq!(&frame[..2], &[1, 0]);
    assert_eq!(&frame[2..5], b"abc");
    assert!(frame[5..].iter().all(|&b| b == 0));
}

#[test]
fn test_encode_exact_length_is_not_padded() {
    let payload = vec![7u8; 300];

    let frame = encode_frame(&payload).unwrap();

    assert_eq!(frame.len(), 2 + 300);
    assert_eq!(decode_header(&frame).unwrap(), Some((2, 300)));
}

#[test]
fn test_encode_header_decodes_to_frame_length() {
    for len in [0usize, 1, 255, 256, 511, 512, 70_000] {
        let frame = encode_frame(&vec![1u8; len]).unwrap();
        let (header_len, payload_len) = decode_header(&frame).unwrap().unwrap();

        assert_eq!(header_len + payload_len as usize, frame.len());
        assert!(payload_len as usize >= len);
    }
}

#[test]
fn test_frame_io() {
    let mut wire = Vec::new();
    write_frame(&mut wire, b"first").unwrap();
    write_frame(&mut wire, b"").unwrap();

    let mut reader = Cursor::new(wire);
    let first = read_frame(&mut reader, 1024).unwrap();
    let second = read_frame(&mut reader, 1024).unwrap();

    assert_eq!(&first[..5], b"first");
    assert_eq!(first.len(), 256);
    assert!(second.is_empty());
    assert!(matches!(read_frame(&mut reader, 1024), Err(KvError::Disconnected)));
}

#[test]
fn test_read_frame_enforces_max_len() {
    let wire = encode_frame(&[1u8; 10]).unwrap();

    let result = read_frame(&mut Cursor::new(wire), 100);

    assert!(matches!(result, Err(KvError::Protocol(_))));
}

// =============================================================================
// Codec Tests
// =============================================================================

#[test]
fn test_codec_ignores_padding() {
    let value = Value::Array(vec![Value::Uint(1), Value::from("G"), Value::Nil]);
    let mut payload = BincodeCodec.encode(&value).unwrap();
    payload.resize(payload.len() + 100, 0);

    assert_eq!(BincodeCodec.decode(&payload).unwrap(), value);
}

#[test]
fn test_codec_rejects_garbage() {
    assert!(BincodeCodec.decode(&[0xff, 0xff, 0xff, 0xff]).is_err());
    assert!(BincodeCodec.decode(&[]).is_err());
}

// =============================================================================
// Envelope Tests
// =============================================================================

fn encode(value: &Value) -> Vec<u8> {
    BincodeCodec.encode(value).unwrap()
}

#[test]
fn test_envelope_decode() {
    let value = Value::Array(vec![
        Value::from("req-1"),
        Value::from("G"),
        Value::Array(vec![Value::Array(vec![])]),
    ]);

    let envelope = Envelope::decode(&BincodeCodec, &encode(&value)).unwrap();

    assert_eq!(envelope.id, Value::from("req-1"));
    assert_eq!(envelope.opcode, OP_GET);
    assert_eq!(envelope.params.len(), 1);
    assert_eq!(envelope.to_value(), value);
}

#[test]
fn test_envelope_decode_failures_are_protocol_errors() {
    let bad = [
        Value::Nil,
        Value::Array(vec![Value::Uint(1), Value::from("G")]),
        Value::Array(vec![Value::Uint(1), Value::Uint(71), Value::Array(vec![])]),
        Value::Array(vec![Value::Uint(1), Value::from(""), Value::Array(vec![])]),
        Value::Array(vec![Value::Uint(1), Value::from("G"), Value::Uint(0)]),
    ];

    for value in &bad {
        let result = Envelope::decode(&BincodeCodec, &encode(value));
        assert!(matches!(result, Err(KvError::Protocol(_))), "{:?}", value);
    }
}

// =============================================================================
// Request Parsing Tests
// =============================================================================

#[test]
fn test_parse_query() {
    let params = vec![
        Value::Bytes(vec![0x20, 1]),
        Value::Bytes(vec![]),
        Value::Uint(4),
        Value::Uint(2),
        Value::Bool(false),
        Value::Bool(true),
        Value::Uint(3),
        Value::Uint(10),
        Value::Uint(20),
    ];

    let request = Request::parse(OP_QUERY, &params).unwrap();

    let expected = Query::new(vec![0x20, 1], FilterOp::Gt)
        .kind(4)
        .shape(2)
        .with_cursor(true)
        .offset(10)
        .limit(20);
    assert_eq!(request, Request::Query(expected));
    assert_eq!(request.to_params(), params);
}

#[test]
fn test_parse_update() {
    let params = vec![
        Value::Array(vec![
            Value::Bytes(b"k1".to_vec()),
            Value::Bytes(b"v1".to_vec()),
            Value::Bytes(b"k2".to_vec()),
            Value::Bytes(b"v2".to_vec()),
        ]),
        Value::Array(vec![Value::Bytes(b"d".to_vec())]),
    ];

    let request = Request::parse(b'U', &params).unwrap();

    assert_eq!(
        request,
        Request::Update {
            puts: vec![
                (b"k1".to_vec(), b"v1".to_vec()),
                (b"k2".to_vec(), b"v2".to_vec())
            ],
            deletes: vec![b"d".to_vec()],
        }
    );
}

#[test]
fn test_parse_errors_are_in_band() {
    let wrong_type = Request::parse(b'N', &[
        Value::Bytes(b"k".to_vec()),
        Value::Uint(1),
        Value::Uint(1),
        Value::Uint(0),
    ]);
    let kind_overflow = Request::parse(OP_QUERY, &[
        Value::Bytes(vec![0x20]),
        Value::Bytes(vec![]),
        Value::Uint(300),
        Value::Uint(0),
        Value::Bool(false),
        Value::Bool(false),
        Value::Uint(1),
        Value::Uint(0),
        Value::Uint(10),
    ]);
    let odd_puts = Request::parse(b'U', &[Value::Array(vec![Value::Uint(1)]), Value::Array(vec![])]);
    let unknown = Request::parse(b'X', &[]);

    assert!(matches!(wrong_type, Err(KvError::InvalidParams(_))));
    assert!(matches!(kind_overflow, Err(KvError::InvalidParams(_))));
    assert!(matches!(odd_puts, Err(KvError::InvalidParams(_))));
    assert!(matches!(unknown, Err(KvError::UnknownOpcode(b'X'))));
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_response_to_value() {
    let ok = Response::ok(Value::Uint(9), Value::Uint(105));
    let err = Response::error(Value::Uint(10), &KvError::InvalidValueSize(3));

    assert_eq!(
        ok.to_value(),
        Value::Array(vec![Value::Uint(9), Value::Nil, Value::Uint(105)])
    );
    assert_eq!(
        err.to_value(),
        Value::Array(vec![
            Value::Uint(10),
            Value::from("Value for incr/decr must be 8-bytes. Got: 3 bytes"),
            Value::Nil
        ])
    );
}

#[test]
fn test_response_from_value() {
    let value = Value::Array(vec![Value::Uint(9), Value::from("boom"), Value::Nil]);

    let response = Response::from_value(value).unwrap();

    assert_eq!(response.id, Value::Uint(9));
    assert_eq!(response.error.as_deref(), Some("boom"));
    assert!(!response.is_ok());
    assert!(Response::from_value(Value::Uint(1)).is_err());
}

#[test]
fn test_not_found_sentinel_matches_error_text() {
    assert_eq!(KvError::KeyNotFound.to_string(), shardkv::protocol::NOT_FOUND);
}
