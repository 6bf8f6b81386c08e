//! Framing: length prefix (4 bytes BE) + type tag (1 byte) + bincode payload.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{
    Body, FilePayload, Message, MessageKind, PresencePayload, SystemPayload, TextPayload,
    Timestamp, UserInfoPayload,
};

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn encode_payload<T: Serialize>(
    out: &mut Vec<u8>,
    timestamp: Timestamp,
    payload: &T,
) -> Result<(), FrameEncodeError> {
    let bytes = codec()
        .serialize(&(timestamp, payload))
        .map_err(FrameEncodeError::Encode)?;
    out.extend_from_slice(&bytes);
    Ok(())
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<(Timestamp, T), FrameDecodeError> {
    codec()
        .deserialize::<(Timestamp, T)>(bytes)
        .map_err(FrameDecodeError::Decode)
}

/// Encode a message into a single frame: 4 bytes BE length, then tag and bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let mut body = Vec::with_capacity(64);
    body.push(msg.kind().tag());
    match &msg.body {
        Body::Text(p) => encode_payload(&mut body, msg.timestamp, p)?,
        Body::File(p) => encode_payload(&mut body, msg.timestamp, p)?,
        Body::System(p) => encode_payload(&mut body, msg.timestamp, p)?,
        Body::UserInfo(p) => encode_payload(&mut body, msg.timestamp, p)?,
        Body::Connection(p) | Body::Disconnection(p) => {
            encode_payload(&mut body, msg.timestamp, p)?
        }
    }
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge(body.len()));
    }
    let len = body.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[source] bincode::Error),
    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),
}

/// Read the length prefix. Rejects lengths that can never form a valid frame.
pub fn frame_len(prefix: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_be_bytes(prefix);
    if len == 0 {
        return Err(FrameDecodeError::Empty);
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    Ok(len as usize)
}

/// Decode the bytes following the length prefix (tag + payload). The whole slice must be consumed.
pub fn decode_body(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    let (&tag, rest) = bytes.split_first().ok_or(FrameDecodeError::Empty)?;
    let kind = MessageKind::from_tag(tag).ok_or(FrameDecodeError::UnknownTag(tag))?;
    let (timestamp, body) = match kind {
        MessageKind::Text => {
            let (ts, p) = decode_payload::<TextPayload>(rest)?;
            (ts, Body::Text(p))
        }
        MessageKind::File => {
            let (ts, p) = decode_payload::<FilePayload>(rest)?;
            (ts, Body::File(p))
        }
        MessageKind::System => {
            let (ts, p) = decode_payload::<SystemPayload>(rest)?;
            (ts, Body::System(p))
        }
        MessageKind::UserInfo => {
            let (ts, p) = decode_payload::<UserInfoPayload>(rest)?;
            (ts, Body::UserInfo(p))
        }
        MessageKind::Connection => {
            let (ts, p) = decode_payload::<PresencePayload>(rest)?;
            (ts, Body::Connection(p))
        }
        MessageKind::Disconnection => {
            let (ts, p) = decode_payload::<PresencePayload>(rest)?;
            (ts, Body::Disconnection(p))
        }
    };
    Ok(Message { timestamp, body })
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// `NeedMore` means the buffer holds less than one full frame; every other error is terminal.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = frame_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg = decode_body(&bytes[LEN_SIZE..LEN_SIZE + len])?;
    Ok((msg, LEN_SIZE + len))
}

/// Error decoding a frame. Anything but `NeedMore` means the stream can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("empty frame")]
    Empty,
    #[error("frame too large ({0} bytes)")]
    TooLarge(u32),
    #[error("unknown message type tag {0}")]
    UnknownTag(u8),
    #[error("decode error: {0}")]
    Decode(#[source] bincode::Error),
}
