//! Fixed-frame message framing for USB/HID-class device channels.
//!
//! A typed application message becomes one or more fixed-size frames:
//! - The first frame carries a 3-byte magic marker (`?##`), a 2-byte
//!   big-endian message type code, and a 4-byte big-endian total length.
//! - Every following frame is pure payload continuation, zero-padded at
//!   the end.
//!
//! Everything here is pure — no I/O, no state beyond the in-flight
//! [`ChunkAssembler`]. Message names resolve through the external
//! [`MessageDict`] seam; payload bytes are an opaque blob.

pub mod codec;
pub mod dict;
pub mod error;

pub use codec::{
    decode, decode_minimal, encode_chunked, encode_minimal, ChunkAssembler, DecodedMessage,
    WireConfig, DEFAULT_FRAME_SIZE, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC, MINIMAL_HEADER_SIZE,
};
pub use dict::{MessageDict, StaticDict};
pub use error::{Result, WireError};
