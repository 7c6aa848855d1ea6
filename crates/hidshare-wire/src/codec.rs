use bytes::{BufMut, Bytes, BytesMut};

use crate::dict::MessageDict;
use crate::error::{Result, WireError};

/// Marker sequence opening every chunked message: `?##`.
pub const MAGIC: [u8; 3] = [0x3f, 0x23, 0x23];

/// Chunked first-frame header: magic (3) + type (2 BE) + length (4 BE).
pub const HEADER_SIZE: usize = 9;

/// Minimal header: type (2 BE) + length (4 BE), no magic.
pub const MINIMAL_HEADER_SIZE: usize = 6;

/// Default transport frame size: one HID report.
pub const DEFAULT_FRAME_SIZE: usize = 64;

/// Default maximum payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    /// Fixed frame size of the packet channel. Default: 64.
    pub frame_size: usize,
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// A message recovered from a frame sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Message name resolved through the dictionary.
    pub name: String,
    /// Wire type code as received.
    pub code: u16,
    /// Opaque payload bytes, padding stripped.
    pub payload: Bytes,
}

/// Encode a message as a single unpadded frame without the marker sequence.
///
/// For transports that frame messages themselves (bridge-style channels):
/// `type (2B BE) + length (4B BE) + payload`, no chunking, no padding.
pub fn encode_minimal(message_type: u16, payload: &[u8]) -> Result<Bytes> {
    check_payload_len(payload.len(), u32::MAX as usize)?;

    let mut buf = BytesMut::with_capacity(MINIMAL_HEADER_SIZE + payload.len());
    buf.put_u16(message_type);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a message into fixed-size frames for a packet-oriented channel.
///
/// Wire format of the first frame:
/// ```text
/// ┌─────────────┬───────────┬────────────┬──────────────────┐
/// │ Magic (3B)  │ Type      │ Length     │ Payload prefix   │
/// │ 0x3f 23 23  │ (2B BE)   │ (4B BE)    │ (zero-padded)    │
/// └─────────────┴───────────┴────────────┴──────────────────┘
/// ```
/// Every subsequent frame is exactly `frame_size` bytes of payload
/// continuation; the last frame is zero-padded.
pub fn encode_chunked(message_type: u16, payload: &[u8], config: &WireConfig) -> Result<Vec<Bytes>> {
    if config.frame_size <= HEADER_SIZE {
        return Err(WireError::FrameSizeTooSmall {
            size: config.frame_size,
            min: HEADER_SIZE + 1,
        });
    }
    check_payload_len(payload.len(), config.max_payload_size.min(u32::MAX as usize))?;

    let first_capacity = config.frame_size - HEADER_SIZE;
    let mut frames = Vec::with_capacity(1 + payload.len().saturating_sub(first_capacity).div_ceil(config.frame_size));

    let mut first = BytesMut::with_capacity(config.frame_size);
    first.put_slice(&MAGIC);
    first.put_u16(message_type);
    first.put_u32(payload.len() as u32);
    let mut offset = payload.len().min(first_capacity);
    first.put_slice(&payload[..offset]);
    first.resize(config.frame_size, 0);
    frames.push(first.freeze());

    while offset < payload.len() {
        let end = (offset + config.frame_size).min(payload.len());
        let mut chunk = BytesMut::with_capacity(config.frame_size);
        chunk.put_slice(&payload[offset..end]);
        chunk.resize(config.frame_size, 0);
        frames.push(chunk.freeze());
        offset = end;
    }

    Ok(frames)
}

/// Decode a chunked frame sequence back into a typed message.
///
/// Reads the header from the first frame, accumulates continuation bytes
/// until the declared total length is collected, and resolves the type code
/// through the dictionary. Trailing padding and surplus frames are ignored.
pub fn decode<'a, I>(frames: I, dict: &dyn MessageDict) -> Result<DecodedMessage>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut frames = frames.into_iter();
    let first = frames.next().ok_or(WireError::MalformedHeader)?;
    let mut assembler = ChunkAssembler::new(first)?;

    for frame in frames {
        if assembler.is_complete() {
            break;
        }
        assembler.push(frame);
    }

    assembler.finish(dict)
}

/// Decode a single minimal frame produced by [`encode_minimal`].
pub fn decode_minimal(frame: &[u8], dict: &dyn MessageDict) -> Result<DecodedMessage> {
    if frame.len() < MINIMAL_HEADER_SIZE {
        return Err(WireError::MalformedHeader);
    }

    let code = u16::from_be_bytes([frame[0], frame[1]]);
    let expected = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize;
    let body = &frame[MINIMAL_HEADER_SIZE..];

    if body.len() < expected {
        return Err(WireError::TruncatedMessage {
            expected,
            received: body.len(),
        });
    }

    let name = dict
        .name_for(code)
        .ok_or(WireError::UnknownMessageType(code))?;

    Ok(DecodedMessage {
        name,
        code,
        payload: Bytes::copy_from_slice(&body[..expected]),
    })
}

/// Incremental decoder for callers that receive frames one at a time.
///
/// [`decode`] is the batch form; drivers that poll a HID endpoint feed
/// frames here as they arrive and call [`ChunkAssembler::finish`] once
/// [`ChunkAssembler::is_complete`] reports true.
#[derive(Debug)]
pub struct ChunkAssembler {
    code: u16,
    expected: usize,
    buf: BytesMut,
}

impl ChunkAssembler {
    /// Parse the header frame and start accumulating.
    ///
    /// Fails with `MalformedHeader` when the marker sequence is absent and
    /// `PayloadTooLarge` when the declared length exceeds the default cap.
    pub fn new(first: &[u8]) -> Result<Self> {
        Self::with_max_payload(first, DEFAULT_MAX_PAYLOAD)
    }

    /// Parse the header frame with an explicit payload cap.
    ///
    /// The cap guards against hostile length fields before any allocation.
    pub fn with_max_payload(first: &[u8], max_payload: usize) -> Result<Self> {
        if first.len() < HEADER_SIZE || first[..MAGIC.len()] != MAGIC {
            return Err(WireError::MalformedHeader);
        }

        let code = u16::from_be_bytes([first[3], first[4]]);
        let expected = u32::from_be_bytes([first[5], first[6], first[7], first[8]]) as usize;

        if expected > max_payload {
            return Err(WireError::PayloadTooLarge {
                size: expected,
                max: max_payload,
            });
        }

        let take = expected.min(first.len() - HEADER_SIZE);
        let mut buf = BytesMut::with_capacity(expected);
        buf.put_slice(&first[HEADER_SIZE..HEADER_SIZE + take]);

        Ok(Self {
            code,
            expected,
            buf,
        })
    }

    /// Append one continuation frame. No-op once the message is complete.
    pub fn push(&mut self, frame: &[u8]) {
        let need = self.expected - self.buf.len();
        if need == 0 {
            return;
        }
        let take = need.min(frame.len());
        self.buf.put_slice(&frame[..take]);
    }

    /// Whether the declared payload length has been accumulated.
    pub fn is_complete(&self) -> bool {
        self.buf.len() == self.expected
    }

    /// Payload bytes accumulated so far.
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// Wire type code from the header frame.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Resolve the type code and hand back the assembled message.
    pub fn finish(self, dict: &dyn MessageDict) -> Result<DecodedMessage> {
        if !self.is_complete() {
            return Err(WireError::TruncatedMessage {
                expected: self.expected,
                received: self.buf.len(),
            });
        }

        let name = dict
            .name_for(self.code)
            .ok_or(WireError::UnknownMessageType(self.code))?;
        tracing::trace!(code = self.code, len = self.expected, %name, "message assembled");

        Ok(DecodedMessage {
            name,
            code: self.code,
            payload: self.buf.freeze(),
        })
    }
}

fn check_payload_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(WireError::PayloadTooLarge { size: len, max });
    }
    Ok(())
}
