//! Tests for Engine
//!
//! These tests verify:
//! - Counter semantics (initial value, incr/decr, value-size validation)
//! - Multi-get across instances with not-found placeholders
//! - Batched update atomicity and routing-failure abort
//! - Request envelope handling (fatal vs in-band errors)
//! - Engine lifecycle (open/clear)

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use shardkv::config::Config;
use shardkv::engine::Engine;
use shardkv::error::KvError;
use shardkv::protocol::{
    framed_len, BincodeCodec, Request, Response, Value, ValueCodec, MAX_NESTING, NOT_FOUND,
};
use shardkv::query::{FilterOp, Query};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_config(&temp_dir)).unwrap();
    (temp_dir, engine)
}

/// Send an envelope through the engine and decode the response
fn roundtrip(engine: &Engine, envelope: Value) -> Response {
    let payload = BincodeCodec.encode(&envelope).unwrap();
    let response = engine.handle_payload(&payload).unwrap();
    Response::from_value(BincodeCodec.decode(&response).unwrap()).unwrap()
}

fn envelope(id: u64, opcode: &str, params: Vec<Value>) -> Value {
    Value::Array(vec![Value::Uint(id), Value::from(opcode), Value::Array(params)])
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_basedir() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_config(&temp_dir);

    let _engine = Engine::open(config.clone()).unwrap();

    assert!(config.basedir.is_dir());
}

#[test]
fn test_engine_clear_on_startup() {
    let temp_dir = TempDir::new().unwrap();
    let key = data_key(2, 1, 4);

    {
        let engine = Engine::open(temp_config(&temp_dir)).unwrap();
        engine.update(&[(key.clone(), b"v".to_vec())], &[]).unwrap();
        engine.close();
    }

    let config = Config::builder()
        .basedir(temp_dir.path().join("data"))
        .shards(1, 4)
        .clear_on_startup(true)
        .build();
    let engine = Engine::open(config).unwrap();

    assert_eq!(engine.get_many(&[key]).unwrap(), vec![None]);
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_counter_starts_from_init() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);

    assert_eq!(engine.incr_decr(&key, true, 5, 100).unwrap(), 105);
    assert_eq!(engine.incr_decr(&key, false, 5, 100).unwrap(), 100);
}

#[test]
fn test_counter_stored_big_endian() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);

    engine.incr_decr(&key, true, 1, 0x0102).unwrap();

    let stored = engine.get_many(&[key]).unwrap();
    assert_eq!(stored, vec![Some(0x0103u64.to_be_bytes().to_vec())]);
}

#[test]
fn test_counter_wraps() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);

    assert_eq!(engine.incr_decr(&key, false, 1, 0).unwrap(), u64::MAX);
    assert_eq!(engine.incr_decr(&key, true, 2, 0).unwrap(), 1);
}

#[test]
fn test_counter_rejects_wrong_value_size() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);
    engine.update(&[(key.clone(), b"abc".to_vec())], &[]).unwrap();

    let err = engine.incr_decr(&key, true, 1, 0).unwrap_err();

    assert!(matches!(err, KvError::InvalidValueSize(3)));
    assert_eq!(engine.get_many(&[key]).unwrap(), vec![Some(b"abc".to_vec())]);
}

#[test]
fn test_counter_out_of_range_shard() {
    let (_temp, engine) = setup_temp_engine();

    let err = engine.incr_decr(&data_key(10, 1, 4), true, 1, 0).unwrap_err();

    assert!(err.is_routing());
}

#[test]
fn test_concurrent_counter_increments() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);
    let key = data_key(2, 1, 4);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    engine.incr_decr(&key, true, 1, 0).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.incr_decr(&key, true, 0, 0).unwrap(), 400);
}

// =============================================================================
// Get / Update Tests
// =============================================================================

#[test]
fn test_get_many_across_shards() {
    let (_temp, engine) = setup_temp_engine();
    let k2 = data_key(2, 1, 4);
    let k3 = data_key(3, 1, 4);
    let missing = data_key(2, 9, 4);
    engine
        .update(&[(k2.clone(), b"two".to_vec()), (k3.clone(), b"three".to_vec())], &[])
        .unwrap();

    let values = engine.get_many(&[k3, missing, k2]).unwrap();

    assert_eq!(values, vec![Some(b"three".to_vec()), None, Some(b"two".to_vec())]);
}

#[test]
fn test_get_not_found_placeholder() {
    let (_temp, engine) = setup_temp_engine();
    let present = data_key(2, 1, 4);
    engine.update(&[(present.clone(), b"v".to_vec())], &[]).unwrap();

    let result = engine
        .execute(Request::Get {
            keys: vec![present, data_key(2, 2, 4)],
        })
        .unwrap();

    assert_eq!(
        result,
        Value::Array(vec![Value::Bytes(b"v".to_vec()), Value::from(NOT_FOUND)])
    );
}

#[test]
fn test_get_routing_failure_fails_whole_call() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.get_many(&[data_key(2, 1, 4), data_key(10, 1, 4)]);

    assert!(matches!(result, Err(KvError::ShardOutOfRange { shard: 10, .. })));
}

#[test]
fn test_update_puts_and_deletes_same_instance() {
    let (_temp, engine) = setup_temp_engine();
    let keep = data_key(2, 1, 4);
    let gone = data_key(2, 2, 4);
    engine.update(&[(gone.clone(), b"x".to_vec())], &[]).unwrap();

    engine
        .update(&[(keep.clone(), b"new".to_vec())], &[gone.clone()])
        .unwrap();

    assert_eq!(
        engine.get_many(&[keep, gone]).unwrap(),
        vec![Some(b"new".to_vec()), None]
    );
}

#[test]
fn test_update_routing_failure_writes_nothing() {
    let (_temp, engine) = setup_temp_engine();
    let good = data_key(2, 1, 4);
    let bad = data_key(10, 1, 4);

    let err = engine
        .update(&[(good.clone(), b"v".to_vec()), (bad, b"v".to_vec())], &[])
        .unwrap_err();

    assert!(err.is_routing());
    assert_eq!(engine.get_many(&[good]).unwrap(), vec![None]);
}

#[test]
fn test_update_bad_delete_key_aborts_puts() {
    let (_temp, engine) = setup_temp_engine();
    let good = data_key(2, 1, 4);

    let result = engine.update(&[(good.clone(), b"v".to_vec())], &[vec![0x90, 0, 0]]);

    assert!(matches!(result, Err(KvError::UnknownDiscriminator(9))));
    assert_eq!(engine.get_many(&[good]).unwrap(), vec![None]);
}

#[test]
fn test_query_routes_by_seek_low() {
    let (_temp, engine) = setup_temp_engine();
    let a = data_key(3, 1, 4);
    let b = data_key(3, 2, 4);
    let other_shard = data_key(2, 1, 4);
    engine
        .update(
            &[
                (a.clone(), b"".to_vec()),
                (b.clone(), b"".to_vec()),
                (other_shard, b"".to_vec()),
            ],
            &[],
        )
        .unwrap();

    let rows = engine
        .query(&Query::new(root_prefix(3, 0, 9), FilterOp::Gte))
        .unwrap();

    assert_eq!(rows, vec![a, b]);
}

// =============================================================================
// Envelope Tests
// =============================================================================

#[test]
fn test_envelope_counter_roundtrip() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);

    let response = roundtrip(
        &engine,
        envelope(
            42,
            "N",
            vec![Value::Bytes(key), Value::Bool(true), Value::Uint(5), Value::Uint(100)],
        ),
    );

    assert_eq!(response.id, Value::Uint(42));
    assert_eq!(response.error, None);
    assert_eq!(response.result, Some(Value::Uint(105)));
}

#[test]
fn test_envelope_unknown_opcode_is_in_band() {
    let (_temp, engine) = setup_temp_engine();

    let response = roundtrip(&engine, envelope(1, "Z", vec![]));

    assert_eq!(response.error.as_deref(), Some("Invalid desc byte: 0x5a"));
    assert_eq!(response.result, None);
}

#[test]
fn test_envelope_bad_params_are_in_band() {
    let (_temp, engine) = setup_temp_engine();

    let arity = roundtrip(&engine, envelope(1, "N", vec![Value::Uint(1)]));
    let odd_puts = roundtrip(
        &engine,
        envelope(
            2,
            "U",
            vec![Value::Array(vec![Value::Bytes(data_key(2, 1, 4))]), Value::Array(vec![])],
        ),
    );

    assert!(arity.error.unwrap().contains("expected 4 params"));
    assert!(odd_puts.error.unwrap().contains("odd number"));
}

#[test]
fn test_envelope_routing_error_is_in_band() {
    let (_temp, engine) = setup_temp_engine();

    let response = roundtrip(
        &engine,
        envelope(7, "G", vec![Value::Array(vec![Value::Bytes(data_key(10, 1, 4))])]),
    );

    assert_eq!(response.id, Value::Uint(7));
    assert_eq!(
        response.error.as_deref(),
        Some("Invalid shard: 10 (shard min 1, shard range 4)")
    );
}

#[test]
fn test_envelope_update_result_is_nil() {
    let (_temp, engine) = setup_temp_engine();
    let key = data_key(2, 1, 4);

    let response = roundtrip(
        &engine,
        envelope(
            3,
            "U",
            vec![
                Value::Array(vec![Value::Bytes(key.clone()), Value::Bytes(b"v".to_vec())]),
                Value::Array(vec![]),
            ],
        ),
    );

    assert!(response.is_ok());
    assert_eq!(response.result, None);
    assert_eq!(engine.get_many(&[key]).unwrap(), vec![Some(b"v".to_vec())]);
}

#[test]
fn test_malformed_envelope_is_fatal() {
    let (_temp, engine) = setup_temp_engine();

    let not_array = BincodeCodec.encode(&Value::Uint(1)).unwrap();
    let two_elements = BincodeCodec
        .encode(&Value::Array(vec![Value::Uint(1), Value::from("G")]))
        .unwrap();
    let long_opcode = BincodeCodec.encode(&envelope(1, "GG", vec![])).unwrap();

    for payload in [vec![0xff, 0xff, 0xff, 0xff], not_array, two_elements, long_opcode] {
        let err = engine.handle_payload(&payload).unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }
}

#[test]
fn test_deeply_nested_payload_is_rejected() {
    let (_temp, engine) = setup_temp_engine();

    // 200,000 one-element arrays around an empty one, in bincode layout
    let mut payload = Vec::with_capacity(200_000 * 12 + 4);
    for _ in 0..200_000 {
        payload.extend_from_slice(&5u32.to_le_bytes());
        payload.extend_from_slice(&1u64.to_le_bytes());
    }
    payload.extend_from_slice(&0u32.to_le_bytes());

    let err = engine.handle_payload(&payload).unwrap_err();

    assert!(matches!(err, KvError::Protocol(_)));
}

#[test]
fn test_nesting_within_limit_is_served() {
    let (_temp, engine) = setup_temp_engine();
    let deep_id = (0..MAX_NESTING - 1).fold(Value::Uint(1), |inner, _| Value::Array(vec![inner]));

    let response = roundtrip(&engine, envelope(0, "G", vec![Value::Array(vec![])]));
    let deep = roundtrip(
        &engine,
        Value::Array(vec![deep_id.clone(), Value::from("G"), Value::Array(vec![Value::Array(vec![])])]),
    );

    assert!(response.is_ok());
    assert_eq!(deep.id, deep_id);
    assert!(deep.is_ok());
}

// =============================================================================
// Response Size Tests
// =============================================================================

#[test]
fn test_oversized_result_becomes_in_band_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .basedir(temp_dir.path().join("data"))
        .shards(1, 4)
        .max_frame_len(4096)
        .build();
    let engine = Engine::open(config).unwrap();
    let key = data_key(2, 1, 4);
    engine.update(&[(key.clone(), vec![7u8; 5000])], &[]).unwrap();

    let payload = BincodeCodec
        .encode(&envelope(11, "G", vec![Value::Array(vec![Value::Bytes(key)])]))
        .unwrap();
    let encoded = engine.handle_payload(&payload).unwrap();
    let response = Response::from_value(BincodeCodec.decode(&encoded).unwrap()).unwrap();

    assert!(framed_len(encoded.len()).unwrap() <= 4096);
    assert_eq!(response.id, Value::Uint(11));
    assert!(response.error.unwrap().starts_with("Response too large"));
    assert_eq!(response.result, None);
}

#[test]
fn test_result_within_frame_limit_is_returned() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .basedir(temp_dir.path().join("data"))
        .shards(1, 4)
        .max_frame_len(4096)
        .build();
    let engine = Engine::open(config).unwrap();
    let key = data_key(2, 1, 4);
    // Small enough that the frame stays in the two-byte-header range
    engine.update(&[(key.clone(), vec![7u8; 300])], &[]).unwrap();

    let response = roundtrip(
        &engine,
        envelope(12, "G", vec![Value::Array(vec![Value::Bytes(key)])]),
    );

    assert_eq!(response.result, Some(Value::Array(vec![Value::Bytes(vec![7u8; 300])])));
}
