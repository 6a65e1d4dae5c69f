//! Connection Handler
//!
//! Non-blocking per-connection state machine.
//!
//! ## Phases
//! ```text
//!   ┌───────┐ header  ┌─────────┐ payload ┌────────────┐ response ┌─────────┐
//!   │ Ready │────────▶│ Reading │────────▶│ Processing │─────────▶│ Writing │
//!   └───────┘         └─────────┘         └────────────┘          └────┬────┘
//!       ▲                                                              │
//!       └──────────────────────── fully written ───────────────────────┘
//! ```
//!
//! `drive` runs phases until the stream would block, then parks. Partial
//! headers, payloads and writes survive across calls. Bytes read past the
//! current frame are kept for the next one, and are only looked at after the
//! current response has been written.

use std::io::{self, ErrorKind, Read, Write};
use std::time::Instant;

use bytes::{Buf, BytesMut};

use crate::error::{KvError, Result};
use crate::protocol::{decode_header, encode_frame, framed_len, MAX_HEADER_LEN};

/// Largest single read while collecting a payload
const READ_CHUNK: usize = 64 * 1024;

/// Turns one request payload into one response payload
///
/// An `Err` is fatal: the connection is dropped without a response.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &[u8]) -> Result<Vec<u8>>;
}

/// Where a connection is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a frame header
    Ready,
    /// Header parsed; collecting the payload
    Reading,
    /// Payload complete; handing it to the handler
    Processing,
    /// Writing the framed response
    Writing,
}

/// State of one client connection over any byte stream
pub struct Connection<S> {
    stream: S,

    /// Peer address for logging
    peer: String,

    phase: Phase,

    /// Bytes read but not yet consumed (header, payload, next frames)
    input: BytesMut,

    /// Payload length of the current request
    request_len: usize,

    /// Framed response being written
    output: Vec<u8>,

    /// Bytes of `output` already written
    cursor: usize,

    /// Largest accepted request payload and largest response frame
    max_frame_len: u64,

    /// Set when the last write would block; cleared on progress
    write_blocked_at: Option<Instant>,

    /// Requests answered on this connection
    served: u64,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, peer: impl Into<String>, max_frame_len: u64) -> Self {
        Self {
            stream,
            peer: peer.into(),
            phase: Phase::Ready,
            input: BytesMut::with_capacity(MAX_HEADER_LEN),
            request_len: 0,
            output: Vec::new(),
            cursor: 0,
            max_frame_len,
            write_blocked_at: None,
            served: 0,
        }
    }

    /// Advance the state machine until the stream would block
    ///
    /// `Ok(())` means parked; call again when the stream is ready. `Err`
    /// means the connection is finished (`Disconnected` on a clean close).
    pub fn drive(&mut self, handler: &dyn RequestHandler) -> Result<()> {
        loop {
            let progressed = match self.phase {
                Phase::Ready => self.do_ready()?,
                Phase::Reading => self.do_read()?,
                Phase::Processing => self.do_process(handler)?,
                Phase::Writing => self.do_write()?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// True if `drive` can make progress without new bytes from the peer
    ///
    /// A response stuck on a full socket is not pending; see `write_blocked_at`.
    pub fn has_pending(&self) -> bool {
        match self.phase {
            Phase::Ready => matches!(decode_header(&self.input), Ok(Some(_)) | Err(_)),
            Phase::Reading => self.input.len() >= self.request_len,
            Phase::Processing => true,
            Phase::Writing => self.write_blocked_at.is_none(),
        }
    }

    /// When the current response last hit a full socket, if it did
    pub fn write_blocked_at(&self) -> Option<Instant> {
        self.write_blocked_at
    }

    // =========================================================================
    // Phases
    // =========================================================================

    fn do_ready(&mut self) -> Result<bool> {
        loop {
            if let Some((header_len, len)) = decode_header(&self.input)? {
                if len > self.max_frame_len {
                    return Err(KvError::Protocol(format!(
                        "Payload too large: {} bytes (max {})",
                        len, self.max_frame_len
                    )));
                }
                self.input.advance(header_len);
                self.request_len = len as usize;
                self.phase = Phase::Reading;
                return Ok(true);
            }

            let mut head = [0u8; MAX_HEADER_LEN];
            match self.read_some(&mut head)? {
                Some(n) => self.input.extend_from_slice(&head[..n]),
                None => return Ok(false),
            }
        }
    }

    fn do_read(&mut self) -> Result<bool> {
        while self.input.len() < self.request_len {
            let want = (self.request_len - self.input.len()).min(READ_CHUNK);
            let start = self.input.len();
            self.input.resize(start + want, 0);
            let read = read_retrying(&mut self.stream, &mut self.input[start..]);
            match read {
                Ok(0) => {
                    self.input.truncate(start);
                    return Err(KvError::Disconnected);
                }
                Ok(n) => self.input.truncate(start + n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.input.truncate(start);
                    return Ok(false);
                }
                Err(e) => {
                    self.input.truncate(start);
                    return Err(e.into());
                }
            }
        }
        self.phase = Phase::Processing;
        Ok(true)
    }

    fn do_process(&mut self, handler: &dyn RequestHandler) -> Result<bool> {
        let request = self.input.split_to(self.request_len);
        let response = handler.handle(&request)?;

        let framed = framed_len(response.len())?;
        if framed > self.max_frame_len {
            tracing::warn!(
                "Response to {} of {} bytes frames to {} (max {})",
                self.peer,
                response.len(),
                framed,
                self.max_frame_len
            );
            return Err(KvError::Protocol(format!(
                "Response frame too large: {} bytes (max {})",
                framed, self.max_frame_len
            )));
        }
        self.output = encode_frame(&response)?;
        self.cursor = 0;
        self.phase = Phase::Writing;
        Ok(true)
    }

    fn do_write(&mut self) -> Result<bool> {
        while self.cursor < self.output.len() {
            match self.stream.write(&self.output[self.cursor..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.cursor += n;
                    self.write_blocked_at = None;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.write_blocked_at = Some(Instant::now());
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.stream.flush()?;

        self.served += 1;
        tracing::trace!("Response sent to {}", self.peer);
        self.reset();
        Ok(true)
    }

    /// Clear per-request state; carried-over input is kept
    fn reset(&mut self) {
        self.phase = Phase::Ready;
        self.request_len = 0;
        self.output.clear();
        self.cursor = 0;
        self.write_blocked_at = None;
    }

    /// One read into `buf`; `None` when the stream would block
    fn read_some(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match read_retrying(&mut self.stream, buf) {
            Ok(0) => Err(KvError::Disconnected),
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl<S> Connection<S> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.input.len()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
