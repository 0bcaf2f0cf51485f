//! Wire framing for the czar <-> worker result stream (spec.md §6.1).
//!
//! A frame is `<header : HEADER_FRAME_SIZE bytes><body : header.body_size bytes>`.
//! The header frame is fixed-size and self-describing: its first byte holds
//! the number of meaningful bytes that follow (the rest is padding), which is
//! how `ResponseHandler` can decode a header out of a buffer it only knows
//! the total size of. Grounded on `ProtoHeaderWrap`'s header-size-byte
//! convention in `examples/original_source/core/modules/ccontrol/MergingHandler.cc`.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Fixed size of the header frame, known to both czar and worker.
pub const HEADER_FRAME_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub worker_name: String,
    pub body_size: u32,
    pub md5: [u8; 16],
    pub continues: bool,
}

impl Header {
    pub fn new(worker_name: impl Into<String>, body_size: u32, body: &[u8], continues: bool) -> Self {
        Self {
            worker_name: worker_name.into(),
            body_size,
            md5: md5_of(body),
            continues,
        }
    }

    /// Encode into a fixed `HEADER_FRAME_SIZE`-byte frame. The first byte is
    /// the effective payload length; the remainder is zero-padded.
    pub fn encode(&self) -> Result<[u8; HEADER_FRAME_SIZE]> {
        let cfg = bincode::config::standard();
        let payload = bincode::serde::encode_to_vec(self, cfg)?;
        if payload.len() + 1 > HEADER_FRAME_SIZE {
            return Err(FabricError::ResultDecode(format!(
                "encoded header ({} bytes) does not fit in frame of {HEADER_FRAME_SIZE}",
                payload.len()
            )));
        }
        let mut frame = [0u8; HEADER_FRAME_SIZE];
        frame[0] = payload.len() as u8;
        frame[1..1 + payload.len()].copy_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a header out of a buffer sized `HEADER_FRAME_SIZE`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_FRAME_SIZE {
            return Err(FabricError::ResultDecode(format!(
                "expected header frame of {HEADER_FRAME_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let effective_len = buf[0] as usize;
        if 1 + effective_len > buf.len() {
            return Err(FabricError::ResultDecode(
                "header effective length exceeds frame size".to_string(),
            ));
        }
        let cfg = bincode::config::standard();
        let (header, _consumed): (Header, usize) =
            bincode::serde::decode_from_slice(&buf[1..1 + effective_len], cfg)?;
        Ok(header)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Body {
    pub rows: Vec<Vec<u8>>,
    pub continues: bool,
}

impl Body {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let cfg = bincode::config::standard();
        Ok(bincode::serde::encode_to_vec(self, cfg)?)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let cfg = bincode::config::standard();
        let (body, _consumed): (Body, usize) = bincode::serde::decode_from_slice(buf, cfg)?;
        Ok(body)
    }
}

pub fn md5_of(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hasher.finalize().into()
}
