//! Frame header
//!
//! ## Wire Format
//! ```text
//! ┌────────┬──────────────────┬─────────────────────────────┐
//! │  b (1) │  length tail (b) │      Payload (length)       │
//! └────────┴──────────────────┴─────────────────────────────┘
//!  length = big-endian integer of the b+1 bytes [b, tail...]
//! ```
//!
//! The header is at most 8 bytes. Because `b` is part of the length, a
//! header with leading byte `b` covers lengths in `[b·256^b, (b+1)·256^b)`.
//! Encoders pad the payload with zero bytes up to the smallest length that
//! can be expressed; decoders of the payload ignore the padding.

use std::io::{Read, Write};

use crate::error::{KvError, Result};

/// Largest header: leading byte 7 plus 7 tail bytes
pub const MAX_HEADER_LEN: usize = 8;

/// Largest legal leading byte
pub const MAX_LEN_BYTE: u8 = 7;

/// Parse a frame header from the front of `buf`
///
/// Returns `Ok(None)` while the header is incomplete, otherwise
/// `(header_len, payload_len)`.
pub fn decode_header(buf: &[u8]) -> Result<Option<(usize, u64)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first > MAX_LEN_BYTE {
        return Err(KvError::Protocol(format!(
            "expect up to {} bytes for reading length, but received {}",
            MAX_LEN_BYTE, first
        )));
    }

    let header_len = first as usize + 1;
    if buf.len() < header_len {
        return Ok(None);
    }

    let len = buf[..header_len]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Ok(Some((header_len, len)))
}

/// Smallest expressible length >= `len`, with the header's leading byte
fn padded_len(len: u64) -> Result<(u8, u64)> {
    for b in 0..=MAX_LEN_BYTE {
        let unit = 1u64 << (8 * b as u32);
        let low = b as u64 * unit;
        let high = (b as u64 + 1) * unit;
        if len < high {
            return Ok((b, len.max(low)));
        }
    }
    Err(KvError::Protocol(format!("payload of {} bytes cannot be framed", len)))
}

/// Total bytes `encode_frame` would produce for a payload of `len` bytes
///
/// Padding can grow a frame far past its payload (a 67,108,864-byte payload
/// frames to over 16 GiB), so callers bound this before encoding.
pub fn framed_len(len: usize) -> Result<u64> {
    let (b, padded) = padded_len(len as u64)?;
    Ok(b as u64 + 1 + padded)
}

/// Frame a payload: header, payload, zero padding
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let (b, len) = padded_len(payload.len() as u64)?;
    let header_len = b as usize + 1;
    let total = header_len + len as usize;

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&len.to_be_bytes()[MAX_HEADER_LEN - header_len..]);
    frame.extend_from_slice(payload);
    frame.resize(total, 0);
    Ok(frame)
}

/// Blocking read of one frame's payload
pub fn read_frame<R: Read>(reader: &mut R, max_len: u64) -> Result<Vec<u8>> {
    let mut header = [0u8; MAX_HEADER_LEN];
    read_exact_or_disconnect(reader, &mut header[..1])?;

    let header_len = match decode_header(&header[..1])? {
        Some((header_len, _)) => header_len,
        None => header[0] as usize + 1,
    };
    read_exact_or_disconnect(reader, &mut header[1..header_len])?;

    let len = decode_header(&header[..header_len])?
        .map(|(_, len)| len)
        .unwrap_or(0);
    if len > max_len {
        return Err(KvError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            len, max_len
        )));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_or_disconnect(reader, &mut payload)?;
    Ok(payload)
}

/// Blocking write of one framed payload
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

fn read_exact_or_disconnect<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => KvError::Disconnected,
        _ => KvError::Io(e),
    })
}
