//! Build application messages and push them through a raw device channel.
//!
//! A call is split into sending and receiving; this module covers the
//! sending half. The driver supplies the per-frame sender; the dictionary
//! supplies name → type-code resolution and the already-serialized payload.

use std::future::Future;

use bytes::Bytes;
use hidshare_wire::{encode_chunked, encode_minimal, MessageDict, WireConfig, WireError};

/// Errors from message building and sending.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Framing-level failure.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The device channel failed while a frame was in flight.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;

/// Build a message as one minimal frame, for channels that frame messages
/// themselves.
pub fn build_one(dict: &dyn MessageDict, name: &str, payload: &[u8]) -> Result<Bytes> {
    let code = resolve(dict, name)?;
    Ok(encode_minimal(code, payload)?)
}

/// Build a message as fixed-size chunked frames for a packet channel.
pub fn build_frames(
    dict: &dyn MessageDict,
    name: &str,
    payload: &[u8],
    config: &WireConfig,
) -> Result<Vec<Bytes>> {
    let code = resolve(dict, name)?;
    Ok(encode_chunked(code, payload, config)?)
}

/// Push frames through an async sender, in order, stopping at the first
/// failure.
pub async fn send_frames<F, Fut>(mut sender: F, frames: Vec<Bytes>) -> Result<()>
where
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    for frame in frames {
        sender(frame).await?;
    }
    Ok(())
}

/// Build chunked frames for a named message and send them.
///
/// Resolves once everything reached the sender; the receiving half of the
/// call is the driver's `receive` plus [`hidshare_wire::decode`].
pub async fn build_and_send<F, Fut>(
    dict: &dyn MessageDict,
    sender: F,
    name: &str,
    payload: &[u8],
    config: &WireConfig,
) -> Result<()>
where
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let frames = build_frames(dict, name, payload, config)?;
    tracing::debug!(%name, frames = frames.len(), "sending message");
    send_frames(sender, frames).await
}

fn resolve(dict: &dyn MessageDict, name: &str) -> Result<u16> {
    dict.code_for(name)
        .ok_or_else(|| WireError::UnknownMessageName(name.to_string()).into())
}
