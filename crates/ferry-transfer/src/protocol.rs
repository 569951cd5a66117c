//! Wire format for ferry datagrams.
//!
//! Every datagram is a tagged frame, so raw file bytes can never be mistaken
//! for a control command:
//!
//! ```text
//! [0]     Tag: 0x01 = Control, 0x02 = Chunk
//! [1..3]  Payload length (u16 BE)
//! [3..]   Payload
//! ```
//!
//! Control frames carry one command line and are right-padded with spaces to
//! exactly the session packet size, so every control datagram in a session
//! has uniform length. Chunk frames carry raw file bytes unpadded; only the
//! final chunk of a file may be shorter than a full datagram.

use crate::error::TransferError;

/// Packet size in force until a session negotiates another one.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest negotiable packet size. Leaves room for the frame header plus
/// the longest command line the grammar produces.
pub const MIN_PACKET_SIZE: usize = 64;

/// Largest payload one UDP datagram can carry.
pub const MAX_PACKET_SIZE: usize = 65507;

/// Frame header: one tag byte plus a big-endian u16 payload length.
pub const FRAME_HEADER: usize = 3;

const TAG_CONTROL: u8 = 0x01;
const TAG_CHUNK: u8 = 0x02;

const PAD_BYTE: u8 = b' ';

/// File content bytes one chunk datagram carries at a given packet size.
pub fn chunk_capacity(packet_size: usize) -> usize {
    packet_size - FRAME_HEADER
}

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(String),
    Chunk(Vec<u8>),
}

/// Encode a command line into a control frame of exactly `packet_size`
/// bytes. A line that cannot fit is refused rather than truncated on the
/// wire.
pub fn encode_control(text: &str, packet_size: usize) -> Result<Vec<u8>, TransferError> {
    let payload = text.as_bytes();
    if FRAME_HEADER + payload.len() > packet_size {
        return Err(TransferError::OversizedFrame {
            len: FRAME_HEADER + payload.len(),
            max: packet_size,
        });
    }
    let mut buf = vec![PAD_BYTE; packet_size];
    buf[0] = TAG_CONTROL;
    buf[1..FRAME_HEADER].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    buf[FRAME_HEADER..FRAME_HEADER + payload.len()].copy_from_slice(payload);
    Ok(buf)
}

/// Encode raw file bytes into a chunk frame.
///
/// # Panics
/// Panics if `payload` does not fit the u16 length field; callers slice to
/// [`chunk_capacity`] first.
pub fn encode_chunk(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= u16::MAX as usize);
    let mut buf = vec![0u8; FRAME_HEADER + payload.len()];
    buf[0] = TAG_CHUNK;
    buf[1..FRAME_HEADER].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    buf[FRAME_HEADER..].copy_from_slice(payload);
    buf
}

/// Decode one datagram. Returns None on a short buffer, an unknown tag, or
/// a length field pointing past the end of the datagram.
pub fn decode(datagram: &[u8]) -> Option<Frame> {
    if datagram.len() < FRAME_HEADER {
        return None;
    }
    let len = u16::from_be_bytes([datagram[1], datagram[2]]) as usize;
    let payload = datagram.get(FRAME_HEADER..FRAME_HEADER + len)?;
    match datagram[0] {
        TAG_CONTROL => {
            let text = String::from_utf8_lossy(payload)
                .trim_end_matches(' ')
                .to_string();
            Some(Frame::Control(text))
        }
        TAG_CHUNK => Some(Frame::Chunk(payload.to_vec())),
        _ => None,
    }
}
