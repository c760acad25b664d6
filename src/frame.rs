// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk frame codec
//!
//! ```text
//! +--------+-------------+-------------+----------------------+
//! | magic  | payload_len | crc32       | payload              |
//! | 4 B    | u32 LE      | u32 LE      | payload_len bytes    |
//! +--------+-------------+-------------+----------------------+
//! ```
//!
//! A frame is valid iff the whole payload is present and its CRC32 matches.
//! Anything else at the tail of a segment is treated as absent.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read};

pub const FRAME_MAGIC: [u8; 4] = *b"TSP1";
pub const FRAME_HEADER_LEN: usize = 12;

/// Upper bound for a single payload; larger lengths can only come from garbage
pub const MAX_FRAME_PAYLOAD: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub crc32: u32,
}

impl FrameHeader {
    pub fn parse(raw: &[u8; FRAME_HEADER_LEN]) -> Result<Self, String> {
        let mut buf = &raw[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != FRAME_MAGIC {
            return Err(format!("bad magic {:02x?}", magic));
        }
        let payload_len = buf.get_u32_le();
        let crc32 = buf.get_u32_le();
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(format!("payload length {} exceeds limit", payload_len));
        }
        Ok(Self { payload_len, crc32 })
    }
}

/// Total on-disk size of a frame carrying `payload_len` bytes
pub fn frame_len(payload_len: usize) -> u64 {
    (FRAME_HEADER_LEN + payload_len) as u64
}

/// Encode a payload into a complete frame
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(crc32fast::hash(payload));
    buf.put_slice(payload);
    buf.freeze()
}

/// Result of reading one frame position
#[derive(Debug)]
pub enum FrameRead {
    /// A complete, checksummed frame starting at `offset`
    Frame {
        payload: Vec<u8>,
        offset: u64,
        len: u64,
    },
    /// Reached the read limit exactly on a frame boundary
    End,
    /// Bytes remain but not enough for a whole frame
    Incomplete { offset: u64 },
    /// The frame at `offset` failed validation. When the header was readable
    /// the reader has already moved past the frame and `next_offset` is set.
    Invalid {
        offset: u64,
        reason: String,
        next_offset: Option<u64>,
    },
}

/// Sequential frame reader bounded by `limit` bytes of the underlying source
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    limit: u64,
}

impl<R: Read> FrameReader<R> {
    /// `inner` must already be positioned at `offset`
    pub fn new(inner: R, offset: u64, limit: u64) -> Self {
        Self {
            inner,
            offset,
            limit,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn next_frame(&mut self) -> io::Result<FrameRead> {
        if self.offset >= self.limit {
            return Ok(FrameRead::End);
        }
        let start = self.offset;
        let remaining = self.limit - start;
        if remaining < FRAME_HEADER_LEN as u64 {
            return Ok(FrameRead::Incomplete { offset: start });
        }

        let mut raw = [0u8; FRAME_HEADER_LEN];
        if let Err(e) = self.inner.read_exact(&mut raw) {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => Ok(FrameRead::Incomplete { offset: start }),
                _ => Err(e),
            };
        }

        let header = match FrameHeader::parse(&raw) {
            Ok(header) => header,
            Err(reason) => {
                return Ok(FrameRead::Invalid {
                    offset: start,
                    reason,
                    next_offset: None,
                })
            }
        };

        let len = frame_len(header.payload_len as usize);
        if len > remaining {
            return Ok(FrameRead::Incomplete { offset: start });
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        if let Err(e) = self.inner.read_exact(&mut payload) {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => Ok(FrameRead::Incomplete { offset: start }),
                _ => Err(e),
            };
        }
        self.offset = start + len;

        if crc32fast::hash(&payload) != header.crc32 {
            return Ok(FrameRead::Invalid {
                offset: start,
                reason: "crc mismatch".to_string(),
                next_offset: Some(self.offset),
            });
        }

        Ok(FrameRead::Frame {
            payload,
            offset: start,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> FrameReader<Cursor<Vec<u8>>> {
        let limit = bytes.len() as u64;
        FrameReader::new(Cursor::new(bytes), 0, limit)
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame(b"abc");
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(&frame[..4], &FRAME_MAGIC);
        assert_eq!(&frame[4..8], &3u32.to_le_bytes());
        assert_eq!(&frame[8..12], &crc32fast::hash(b"abc").to_le_bytes());
        assert_eq!(&frame[12..], b"abc");
    }

    #[test]
    fn test_reads_frames_then_end() {
        let mut bytes = encode_frame(b"one").to_vec();
        bytes.extend_from_slice(&encode_frame(b"two"));
        let mut r = reader(bytes);

        match r.next_frame().unwrap() {
            FrameRead::Frame { payload, offset, .. } => {
                assert_eq!(payload, b"one");
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(r.next_frame().unwrap(), FrameRead::Frame { .. }));
        assert!(matches!(r.next_frame().unwrap(), FrameRead::End));
    }

    #[test]
    fn test_partial_payload_is_incomplete() {
        let mut bytes = encode_frame(b"complete").to_vec();
        let torn = encode_frame(b"torn payload");
        bytes.extend_from_slice(&torn[..torn.len() - 3]);
        let mut r = reader(bytes);

        assert!(matches!(r.next_frame().unwrap(), FrameRead::Frame { .. }));
        match r.next_frame().unwrap() {
            FrameRead::Incomplete { offset } => assert_eq!(offset, frame_len(8)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_crc_mismatch_is_skippable() {
        let mut bytes = encode_frame(b"flipped").to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        bytes.extend_from_slice(&encode_frame(b"next"));
        let mut r = reader(bytes);

        match r.next_frame().unwrap() {
            FrameRead::Invalid { next_offset, .. } => assert_eq!(next_offset, Some(frame_len(7))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(r.next_frame().unwrap(), FrameRead::Frame { .. }));
    }

    #[test]
    fn test_bad_magic_is_invalid() {
        let mut r = reader(vec![0u8; 32]);
        assert!(matches!(
            r.next_frame().unwrap(),
            FrameRead::Invalid { next_offset: None, .. }
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        raw[..4].copy_from_slice(&FRAME_MAGIC);
        raw[4..8].copy_from_slice(&(MAX_FRAME_PAYLOAD + 1).to_le_bytes());
        assert!(FrameHeader::parse(&raw).is_err());
    }
}
