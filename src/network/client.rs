//! Blocking Client
//!
//! One request at a time over a plain `TcpStream`. Used by the CLI and the
//! end-to-end tests.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};

use crate::error::{KvError, Result};
use crate::protocol::{
    read_frame, write_frame, BincodeCodec, Envelope, Request, Response, Value, ValueCodec,
    NOT_FOUND,
};
use crate::query::Query;

/// Largest response accepted by the client (256 MB)
const MAX_RESPONSE_LEN: u64 = 256 * 1024 * 1024;

/// Client for a shardkv server
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    codec: BincodeCodec,
    next_id: u64,
}

impl Client {
    /// Connect to a server
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            codec: BincodeCodec,
            next_id: 1,
        })
    }

    /// Send a request and wait for its response envelope
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        let id = self.next_id;
        self.next_id += 1;

        let envelope = Envelope {
            id: Value::Uint(id),
            opcode: request.opcode(),
            params: request.to_params(),
        };
        self.send_raw(&envelope.to_value())?;

        let response = Response::from_value(self.recv_raw()?)?;
        if response.id != Value::Uint(id) {
            return Err(KvError::Protocol(format!(
                "response id {:?} does not match request id {}",
                response.id, id
            )));
        }
        Ok(response)
    }

    /// Encode and send one value as a frame
    pub fn send_raw(&mut self, value: &Value) -> Result<()> {
        let payload = self.codec.encode(value)?;
        write_frame(&mut self.writer, &payload)
    }

    /// Receive one frame and decode it
    pub fn recv_raw(&mut self) -> Result<Value> {
        let payload = read_frame(&mut self.reader, MAX_RESPONSE_LEN)?;
        self.codec.decode(&payload)
    }

    // =========================================================================
    // Typed Operations
    // =========================================================================

    /// Increment (`incr`) or decrement a counter, returning its new value
    pub fn incr_decr(&mut self, key: &[u8], incr: bool, delta: u64, init: u64) -> Result<u64> {
        let result = self.call_ok(&Request::IncrDecr {
            key: key.to_vec(),
            incr,
            delta,
            init,
        })?;
        result
            .as_uint()
            .ok_or_else(|| unexpected("N", &result))
    }

    /// Fetch keys; missing keys come back as `None`
    pub fn get(&mut self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let result = self.call_ok(&Request::Get {
            keys: keys.to_vec(),
        })?;
        let Some(items) = result.as_array() else {
            return Err(unexpected("G", &result));
        };

        items
            .iter()
            .map(|item| match item {
                Value::Bytes(b) => Ok(Some(b.clone())),
                Value::String(s) if s == NOT_FOUND => Ok(None),
                other => Err(unexpected("G", other)),
            })
            .collect()
    }

    /// Run a range query
    pub fn query(&mut self, query: &Query) -> Result<Vec<Vec<u8>>> {
        let result = self.call_ok(&Request::Query(query.clone()))?;
        let Some(items) = result.as_array() else {
            return Err(unexpected("Q", &result));
        };

        items
            .iter()
            .map(|item| {
                item.as_bytes()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| unexpected("Q", item))
            })
            .collect()
    }

    /// Apply puts and deletes
    pub fn update(&mut self, puts: &[(Vec<u8>, Vec<u8>)], deletes: &[Vec<u8>]) -> Result<()> {
        self.call_ok(&Request::Update {
            puts: puts.to_vec(),
            deletes: deletes.to_vec(),
        })?;
        Ok(())
    }

    /// `call`, turning an in-band error into `KvError::Remote`
    fn call_ok(&mut self, request: &Request) -> Result<Value> {
        let response = self.call(request)?;
        match response.error {
            Some(message) => Err(KvError::Remote(message)),
            None => Ok(response.result.unwrap_or(Value::Nil)),
        }
    }
}

fn unexpected(op: &str, value: &Value) -> KvError {
    KvError::Protocol(format!("unexpected {} result: {:?}", op, value))
}
