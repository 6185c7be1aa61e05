//! Fixed, versioned, little-endian framing for the RPC transport.
//!
//! Every frame is an 8-byte [`FrameHeader`] followed by a bincode body.
//! The header is a `Pod` record so it can be read without a deserializer;
//! multi-byte integers are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`.

use crate::codec::{ChunkInfo, StreamMetadata};
use crate::dpf_error::DpfError;
use crate::session::ProgressEvent;
use crate::transport::call::{Call, ObjectId, Reply};
use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::io::{Read, Write};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FrameHeader {
    pub version_le: u16,
    pub kind_le: u16,
    /// Body length in bytes.
    pub len_le: u32,
}

const_assert_eq!(size_of::<FrameHeader>(), 8);
const_assert_eq!(align_of::<FrameHeader>(), 4);

pub const HEADER_LEN: usize = size_of::<FrameHeader>();

impl FrameHeader {
    pub fn new(kind: u16, len: u32) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            len_le: len.to_le(),
        }
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }

    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }

    pub fn len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One message on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request(Call),
    Reply(Reply),
    /// Opens an upload; the metadata announces sizes.
    UploadBegin { call: Call, metadata: StreamMetadata },
    /// Upload chunk, carrying a copy of the request header.
    UploadChunk { call: Call, info: ChunkInfo, bytes: Vec<u8> },
    UploadEnd,
    /// Client gave up on an upload in flight.
    Abort { reason: String },
    Download(Call),
    StreamBegin { metadata: StreamMetadata },
    StreamChunk { info: ChunkInfo, bytes: Vec<u8> },
    StreamEnd,
    Listen { session: ObjectId },
    Event(ProgressEvent),
    ListenEnd,
}

impl Frame {
    /// Tag stored in the header, for logs and quick dispatch.
    pub fn tag(&self) -> u16 {
        match self {
            Frame::Request(_) => 1,
            Frame::Reply(_) => 2,
            Frame::UploadBegin { .. } => 3,
            Frame::UploadChunk { .. } => 4,
            Frame::UploadEnd => 5,
            Frame::Abort { .. } => 6,
            Frame::Download(_) => 7,
            Frame::StreamBegin { .. } => 8,
            Frame::StreamChunk { .. } => 9,
            Frame::StreamEnd => 10,
            Frame::Listen { .. } => 11,
            Frame::Event(_) => 12,
            Frame::ListenEnd => 13,
        }
    }
}

/// Header plus body, ready for a byte channel.
///
/// # Errors
/// `Transport{Protocol}` when the body exceeds `max_frame_size`.
pub fn encode(frame: &Frame, max_frame_size: usize) -> Result<Bytes, DpfError> {
    let body = bincode::serialize(frame)?;
    if body.len() > max_frame_size || body.len() > u32::MAX as usize {
        return Err(DpfError::protocol(format!(
            "frame of {} bytes exceeds limit of {max_frame_size}",
            body.len()
        )));
    }
    let hdr = FrameHeader::new(frame.tag(), body.len() as u32);
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_slice(bytemuck::bytes_of(&hdr));
    out.put_slice(&body);
    Ok(out.freeze())
}

fn check_header(hdr: &FrameHeader, max_frame_size: usize) -> Result<(), DpfError> {
    if hdr.version() != WIRE_VERSION {
        return Err(DpfError::protocol(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        )));
    }
    if hdr.len() > max_frame_size {
        return Err(DpfError::protocol(format!(
            "announced frame of {} bytes exceeds limit of {max_frame_size}",
            hdr.len()
        )));
    }
    Ok(())
}

/// Inverse of [`encode`] over a complete buffer.
pub fn decode(buf: &[u8], max_frame_size: usize) -> Result<Frame, DpfError> {
    if buf.len() < HEADER_LEN {
        return Err(DpfError::protocol(format!(
            "expected at least {HEADER_LEN} bytes, got {}",
            buf.len()
        )));
    }
    let hdr: FrameHeader = bytemuck::pod_read_unaligned(&buf[..HEADER_LEN]);
    check_header(&hdr, max_frame_size)?;
    let body = &buf[HEADER_LEN..];
    if body.len() != hdr.len() {
        return Err(DpfError::protocol(format!(
            "expected {} body bytes, got {}",
            hdr.len(),
            body.len()
        )));
    }
    let frame: Frame = bincode::deserialize(body)?;
    if frame.tag() != hdr.kind() {
        return Err(DpfError::protocol(format!(
            "header kind {} does not match body tag {}",
            hdr.kind(),
            frame.tag()
        )));
    }
    Ok(frame)
}

pub fn write_frame<W: Write>(w: &mut W, frame: &Frame, max_frame_size: usize) -> Result<(), DpfError> {
    let bytes = encode(frame, max_frame_size)?;
    w.write_all(&bytes)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R, max_frame_size: usize) -> Result<Frame, DpfError> {
    let mut hdr = FrameHeader::zeroed();
    r.read_exact(bytemuck::bytes_of_mut(&mut hdr))?;
    check_header(&hdr, max_frame_size)?;
    let mut body = vec![0u8; hdr.len()];
    r.read_exact(&mut body)?;
    let frame: Frame = bincode::deserialize(&body)?;
    if frame.tag() != hdr.kind() {
        return Err(DpfError::protocol("header kind does not match body tag"));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::call::BaseCall;

    #[test]
    fn header_is_little_endian() {
        let bytes = encode(&Frame::UploadEnd, 1024).unwrap();
        assert_eq!(&bytes[..2], &WIRE_VERSION.to_le_bytes());
        assert_eq!(&bytes[2..4], &5u16.to_le_bytes());
        assert_eq!(decode(&bytes, 1024).unwrap(), Frame::UploadEnd);
    }

    #[test]
    fn oversized_frames_are_refused() {
        let f = Frame::StreamChunk {
            info: ChunkInfo { index: 0, offset: 0, len: 64, last: true },
            bytes: vec![0; 64],
        };
        assert!(encode(&f, 16).is_err());
        let ok = encode(&f, 1024).unwrap();
        assert!(decode(&ok, 16).is_err());
    }

    #[test]
    fn stream_io_round_trip() {
        let mut buf = Vec::new();
        let f = Frame::Request(Call::Base(BaseCall::LiveObjectCount));
        write_frame(&mut buf, &f, 1024).unwrap();
        write_frame(&mut buf, &Frame::ListenEnd, 1024).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cur, 1024).unwrap(), f);
        assert_eq!(read_frame(&mut cur, 1024).unwrap(), Frame::ListenEnd);
        assert!(read_frame(&mut cur, 1024).is_err());
    }
}
