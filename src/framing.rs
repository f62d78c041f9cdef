//! Wire codec for packets over a Unix stream socket.
//!
//! Length-prefixed frames with a type byte:
//!
//! ```text
//! [u32 LE length] [u8 type] [payload: length-1 bytes]
//! ```
//!
//! Frame types:
//! - `0x01`: request expecting a reply: `[u64 LE seq][JSON packet]`
//! - `0x02`: notification, no reply: `[JSON packet]`
//! - `0x03`: reply to a request: `[u64 LE seq][JSON packet]`
//! - `0x04`: unsolicited push event: `[JSON packet]`

use anyhow::{anyhow, bail, Result};

use crate::constants::MAX_FRAME_SIZE;
use crate::packet::Packet;

/// Frame type constants.
pub mod frame_type {
    /// Request expecting a reply (client → provider).
    pub const REQUEST: u8 = 0x01;
    /// Notification without reply (client → provider).
    pub const NOTIFY: u8 = 0x02;
    /// Reply correlated by sequence number (provider → client).
    pub const REPLY: u8 = 0x03;
    /// Push event (provider → client).
    pub const EVENT: u8 = 0x04;
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Request that must be answered with a [`Frame::Reply`] carrying `seq`.
    Request {
        /// Correlation sequence number.
        seq: u64,
        /// Request packet.
        packet: Packet,
    },

    /// Fire-and-forget notification.
    Notify(Packet),

    /// Reply to an earlier request.
    Reply {
        /// Sequence number of the request being answered.
        seq: u64,
        /// Reply packet.
        packet: Packet,
    },

    /// Unsolicited push event.
    Event(Packet),
}

impl Frame {
    /// Encode this frame into a wire-format byte vector.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Frame::Request { seq, packet } => encode_sequenced(frame_type::REQUEST, *seq, packet),
            Frame::Notify(packet) => encode_raw(frame_type::NOTIFY, &serde_json::to_vec(packet)?),
            Frame::Reply { seq, packet } => encode_sequenced(frame_type::REPLY, *seq, packet),
            Frame::Event(packet) => encode_raw(frame_type::EVENT, &serde_json::to_vec(packet)?),
        }
    }
}

fn encode_sequenced(frame_type: u8, seq: u64, packet: &Packet) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(packet)?;
    let mut payload = Vec::with_capacity(8 + json.len());
    payload.extend_from_slice(&seq.to_le_bytes());
    payload.extend_from_slice(&json);
    encode_raw(frame_type, &payload)
}

/// Encode a raw frame with type byte and payload.
fn encode_raw(frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len() + 1)?; // +1 for type byte
    if length > MAX_FRAME_SIZE {
        bail!("Frame too large: {length} bytes (max {MAX_FRAME_SIZE})");
    }
    let mut buf = Vec::with_capacity(4 + 1 + payload.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.push(frame_type);
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn decode_packet(payload: &[u8]) -> Result<Packet> {
    serde_json::from_slice(payload).map_err(|e| anyhow!("Invalid packet JSON: {e}"))
}

fn split_seq(kind: &str, payload: &[u8]) -> Result<(u64, Packet)> {
    if payload.len() < 8 {
        bail!("{kind} frame too short: {} bytes", payload.len());
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&payload[..8]);
    Ok((u64::from_le_bytes(seq), decode_packet(&payload[8..])?))
}

/// Decode a single frame from a type byte and payload.
fn decode_frame(frame_type: u8, payload: &[u8]) -> Result<Frame> {
    match frame_type {
        frame_type::REQUEST => {
            let (seq, packet) = split_seq("Request", payload)?;
            Ok(Frame::Request { seq, packet })
        }
        frame_type::NOTIFY => Ok(Frame::Notify(decode_packet(payload)?)),
        frame_type::REPLY => {
            let (seq, packet) = split_seq("Reply", payload)?;
            Ok(Frame::Reply { seq, packet })
        }
        frame_type::EVENT => Ok(Frame::Event(decode_packet(payload)?)),
        _ => bail!("Unknown frame type: 0x{frame_type:02x}"),
    }
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is malformed or exceeds the size limit.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }

            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);

            if length == 0 {
                bail!("Invalid frame: zero length");
            }
            if length > MAX_FRAME_SIZE {
                bail!("Frame too large: {length} bytes (max {MAX_FRAME_SIZE})");
            }

            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            let frame = decode_frame(self.buf[4], &self.buf[5..total])?;
            frames.push(frame);
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
