//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Layers
//! ```text
//! ┌────────────────┬─────────────────────────────────────────┐
//! │ Header (1..8)  │  Payload: ValueCodec(envelope) + pad    │
//! └────────────────┴─────────────────────────────────────────┘
//! ```
//!
//! ### Request Envelope
//! `[requestId, opcode, params]`, opcode one of `N`, `G`, `Q`, `U`
//!
//! ### Response Envelope
//! `[requestId, error-or-nil, result-or-nil]`
//!
//! Undecodable frames and malformed envelopes are fatal to the connection.
//! Bad parameters and unknown opcodes are answered with an in-band error.

mod frame;
mod request;
mod response;
mod value;

pub use frame::{
    decode_header, encode_frame, framed_len, read_frame, write_frame, MAX_HEADER_LEN, MAX_LEN_BYTE,
};
pub use request::{Envelope, Request, OP_GET, OP_INCR_DECR, OP_QUERY, OP_UPDATE};
pub use response::{Response, NOT_FOUND};
pub use value::{BincodeCodec, Value, ValueCodec, MAX_NESTING};
