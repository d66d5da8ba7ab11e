//! Length-prefixed framing.
//!
//! A frame is a little-endian `u32` length followed by exactly that many
//! payload bytes. The length must lie in `(0, MAX_FRAME_SIZE]`; anything
//! else means the peer is broken or hostile and its session is terminated.

use thiserror::Error;

/// Largest payload a single frame may carry.
pub const MAX_FRAME_SIZE: usize = 100_000;

/// Upper bound on one batched write. A flush that would exceed this is
/// rejected rather than truncated.
pub const MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// Size of the frame header on the wire.
pub const HEADER_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} outside (0, {MAX_FRAME_SIZE}]")]
    InvalidLength(u32),
    #[error("batch of {0} bytes exceeds flush cap of {MAX_BATCH_BYTES} bytes")]
    BatchTooLarge(usize),
    #[error("truncated frame: header declares {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
}

/// Parse a frame header into a validated payload length.
pub fn parse_header(header: [u8; HEADER_SIZE]) -> Result<usize, FrameError> {
    let len = u32::from_le_bytes(header);
    if len == 0 || len as usize > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidLength(len));
    }
    Ok(len as usize)
}

/// Append one `(length ‖ body)` frame to `out`.
pub fn encode_into(body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    if body.is_empty() || body.len() > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidLength(body.len() as u32));
    }
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    Ok(())
}

/// Encode one frame into a fresh buffer.
pub fn encode(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    encode_into(body, &mut out)?;
    Ok(out)
}

/// Concatenate many frames back-to-back into one write buffer.
pub fn encode_batch(bodies: &[Vec<u8>]) -> Result<Vec<u8>, FrameError> {
    let total: usize = bodies.iter().map(|b| HEADER_SIZE + b.len()).sum();
    if total > MAX_BATCH_BYTES {
        return Err(FrameError::BatchTooLarge(total));
    }
    let mut out = Vec::with_capacity(total);
    for body in bodies {
        encode_into(body, &mut out)?;
    }
    Ok(out)
}

/// Split a byte stream into frame payloads. Intended for tests and tools;
/// the session reader works incrementally off the socket instead.
pub fn split_frames(mut buf: &[u8]) -> Result<Vec<&[u8]>, FrameError> {
    let mut frames = Vec::new();
    while !buf.is_empty() {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        let len = parse_header(header)?;
        let rest = &buf[HEADER_SIZE..];
        if rest.len() < len {
            return Err(FrameError::Truncated {
                expected: len,
                available: rest.len(),
            });
        }
        frames.push(&rest[..len]);
        buf = &rest[len..];
    }
    Ok(frames)
}
