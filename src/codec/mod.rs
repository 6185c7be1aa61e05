//! Bulk-transfer codec: typed payloads, chunking and reassembly.
//!
//! Arrays cross the transport as little-endian byte streams cut into chunks
//! of at most `streaming_buffer_size` bytes. Chunks are element-aligned so a
//! receiver can decode each one straight into a pre-allocated typed array.
//! Strings travel as UTF-8, each one terminated by NUL.
//!
//! The chunker is a plain function over `(buffer, chunk_bytes)`; the
//! [`Assembler`] is its inverse and the only place that reports download
//! progress.

mod metadata;

pub use metadata::{
    FLOAT_OR_DOUBLE, NUM_FILES, NUM_STRINGS, SIZE_BYTES, SIZE_DOUBLE, SIZE_INT, SIZE_TOT,
    StreamMetadata,
};

use crate::dpf_error::DpfError;
use crate::progress::ProgressSink;
use serde::{Deserialize, Serialize};

/// Element type of a streamed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayKind {
    Int,
    Double,
    Bytes,
    Strings,
}

impl ArrayKind {
    /// Width of one element on the wire (strings are counted per byte).
    pub fn element_size(self) -> usize {
        match self {
            ArrayKind::Int => 4,
            ArrayKind::Double => 8,
            ArrayKind::Bytes | ArrayKind::Strings => 1,
        }
    }
}

/// A typed array moving through the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Bytes(Vec<u8>),
    Strings(Vec<String>),
}

impl Payload {
    pub fn kind(&self) -> ArrayKind {
        match self {
            Payload::Int(_) => ArrayKind::Int,
            Payload::Double(_) => ArrayKind::Double,
            Payload::Bytes(_) => ArrayKind::Bytes,
            Payload::Strings(_) => ArrayKind::Strings,
        }
    }

    /// Number of elements (strings count as one each).
    pub fn len(&self) -> usize {
        match self {
            Payload::Int(v) => v.len(),
            Payload::Double(v) => v.len(),
            Payload::Bytes(v) => v.len(),
            Payload::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty payload of the given kind.
    pub fn empty(kind: ArrayKind) -> Self {
        match kind {
            ArrayKind::Int => Payload::Int(Vec::new()),
            ArrayKind::Double => Payload::Double(Vec::new()),
            ArrayKind::Bytes => Payload::Bytes(Vec::new()),
            ArrayKind::Strings => Payload::Strings(Vec::new()),
        }
    }

    /// Wire encoding of the whole array.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Int(v) => ints_to_le(v),
            Payload::Double(v) => doubles_to_le(v),
            Payload::Bytes(v) => v.clone(),
            Payload::Strings(v) => encode_strings(v),
        }
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes).
    ///
    /// `count` is the expected number of strings, used to restore trailing
    /// empty strings that NUL stripping would otherwise drop.
    pub fn from_le_bytes(kind: ArrayKind, bytes: &[u8], count: Option<usize>) -> Result<Self, DpfError> {
        if bytes.len() % kind.element_size() != 0 {
            return Err(DpfError::protocol(format!(
                "{} bytes is not a whole number of {:?} elements",
                bytes.len(),
                kind
            )));
        }
        Ok(match kind {
            ArrayKind::Int => Payload::Int(ints_from_le(bytes)),
            ArrayKind::Double => Payload::Double(doubles_from_le(bytes)),
            ArrayKind::Bytes => Payload::Bytes(bytes.to_vec()),
            ArrayKind::Strings => Payload::Strings(decode_strings(bytes, count)?),
        })
    }

    pub fn into_ints(self) -> Result<Vec<i32>, DpfError> {
        match self {
            Payload::Int(v) => Ok(v),
            other => Err(kind_mismatch(ArrayKind::Int, other.kind())),
        }
    }

    pub fn into_doubles(self) -> Result<Vec<f64>, DpfError> {
        match self {
            Payload::Double(v) => Ok(v),
            other => Err(kind_mismatch(ArrayKind::Double, other.kind())),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, DpfError> {
        match self {
            Payload::Bytes(v) => Ok(v),
            other => Err(kind_mismatch(ArrayKind::Bytes, other.kind())),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>, DpfError> {
        match self {
            Payload::Strings(v) => Ok(v),
            other => Err(kind_mismatch(ArrayKind::Strings, other.kind())),
        }
    }
}

fn kind_mismatch(expected: ArrayKind, found: ArrayKind) -> DpfError {
    DpfError::TypeMismatch(format!("expected {expected:?} array, found {found:?}"))
}

#[cfg(target_endian = "little")]
fn ints_to_le(v: &[i32]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

#[cfg(not(target_endian = "little"))]
fn ints_to_le(v: &[i32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

#[cfg(target_endian = "little")]
fn doubles_to_le(v: &[f64]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

#[cfg(not(target_endian = "little"))]
fn doubles_to_le(v: &[f64]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn ints_from_le(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn doubles_from_le(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect()
}

/// NUL-terminate and concatenate.
pub fn encode_strings<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let total: usize = strings.iter().map(|s| s.as_ref().len() + 1).sum();
    let mut out = Vec::with_capacity(total);
    for s in strings {
        out.extend_from_slice(s.as_ref().as_bytes());
        out.push(0);
    }
    out
}

/// Strip trailing NULs, split on NUL, then pad with empty strings up to `count`.
pub fn decode_strings(bytes: &[u8], count: Option<usize>) -> Result<Vec<String>, DpfError> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let mut out = Vec::with_capacity(count.unwrap_or(0));
    if end > 0 {
        for part in bytes[..end].split(|&b| b == 0) {
            let s = std::str::from_utf8(part)
                .map_err(|e| DpfError::protocol(format!("string payload is not UTF-8: {e}")))?;
            out.push(s.to_owned());
        }
    }
    if let Some(n) = count {
        if out.len() > n {
            return Err(DpfError::protocol(format!(
                "decoded {} strings, metadata announced {n}",
                out.len()
            )));
        }
        out.resize(n, String::new());
    }
    Ok(out)
}

/// Position of one chunk inside its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    pub offset: u64,
    pub len: u32,
    pub last: bool,
}

/// Iterator returned by [`chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    buffer: &'a [u8],
    chunk_bytes: usize,
    offset: usize,
    index: u32,
    done: bool,
}

/// Split `buffer` into successive `(header, payload)` pairs of at most
/// `chunk_bytes` bytes.
///
/// An empty buffer yields exactly one empty chunk; otherwise the stream has
/// `ceil(len / chunk_bytes)` chunks, in order.
pub fn chunks(buffer: &[u8], chunk_bytes: usize) -> Chunks<'_> {
    Chunks {
        buffer,
        chunk_bytes: chunk_bytes.max(1),
        offset: 0,
        index: 0,
        done: false,
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = (ChunkInfo, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let end = (self.offset + self.chunk_bytes).min(self.buffer.len());
        let payload = &self.buffer[self.offset..end];
        let last = end == self.buffer.len();
        let info = ChunkInfo {
            index: self.index,
            offset: self.offset as u64,
            len: payload.len() as u32,
            last,
        };
        self.offset = end;
        self.index += 1;
        self.done = last;
        Some((info, payload))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let n = chunk_count(self.buffer.len() - self.offset, self.chunk_bytes);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Number of chunks a buffer of `len` bytes is cut into.
pub fn chunk_count(len: usize, chunk_bytes: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(chunk_bytes.max(1))
    }
}

/// Largest multiple of the element size not above `buffer_size` (at least one element).
pub fn aligned_chunk_size(kind: ArrayKind, buffer_size: usize) -> usize {
    let elem = kind.element_size();
    ((buffer_size / elem).max(1)) * elem
}

/// Drives an optional sink only when the transfer is large enough.
pub struct ProgressGate<'s> {
    sink: Option<&'s mut dyn ProgressSink>,
}

impl<'s> ProgressGate<'s> {
    pub fn new(sink: Option<&'s mut dyn ProgressSink>, total: usize, threshold: usize) -> Self {
        let mut sink = sink.filter(|_| total > threshold);
        if let Some(s) = sink.as_mut() {
            s.start(Some(total));
        }
        Self { sink }
    }

    pub fn update(&mut self, current: usize) {
        if let Some(s) = self.sink.as_mut() {
            s.update(current);
        }
    }

    pub fn finish(&mut self) {
        if let Some(s) = self.sink.as_mut() {
            s.finish();
        }
    }
}

enum Buffer {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Raw(Vec<u8>),
}

/// Upper bound of the up-front reservation made from announced sizes;
/// larger streams grow the buffer as chunks arrive.
pub const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Reassembles a downloaded stream into a typed array.
pub struct Assembler<'s> {
    kind: ArrayKind,
    total_bytes: usize,
    received: usize,
    string_count: Option<usize>,
    buffer: Buffer,
    progress: ProgressGate<'s>,
}

impl<'s> Assembler<'s> {
    /// Pre-allocates from the stream's leading metadata.
    pub fn new(
        metadata: &StreamMetadata,
        threshold: usize,
        sink: Option<&'s mut dyn ProgressSink>,
    ) -> Result<Self, DpfError> {
        let kind = metadata.array_kind()?;
        let total_bytes = metadata.total_bytes()?;
        let elems = total_bytes / kind.element_size();
        let reserve = total_bytes.min(MAX_PREALLOCATION) / kind.element_size();
        let buffer = match kind {
            ArrayKind::Int => Buffer::Int(Vec::with_capacity(reserve)),
            ArrayKind::Double => Buffer::Double(Vec::with_capacity(reserve)),
            ArrayKind::Bytes | ArrayKind::Strings => Buffer::Raw(Vec::with_capacity(reserve)),
        };
        Ok(Self {
            kind,
            total_bytes,
            received: 0,
            string_count: metadata.get(NUM_STRINGS),
            buffer,
            progress: ProgressGate::new(sink, elems, threshold),
        })
    }

    pub fn kind(&self) -> ArrayKind {
        self.kind
    }

    /// Append the next chunk; chunks must arrive in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DpfError> {
        if self.received + chunk.len() > self.total_bytes {
            return Err(DpfError::protocol(format!(
                "stream overflows announced size of {} bytes",
                self.total_bytes
            )));
        }
        match &mut self.buffer {
            Buffer::Int(v) => {
                if chunk.len() % 4 != 0 {
                    return Err(DpfError::protocol("int chunk is not element aligned"));
                }
                v.extend(ints_from_le(chunk));
            }
            Buffer::Double(v) => {
                if chunk.len() % 8 != 0 {
                    return Err(DpfError::protocol("double chunk is not element aligned"));
                }
                v.extend(doubles_from_le(chunk));
            }
            Buffer::Raw(v) => v.extend_from_slice(chunk),
        }
        self.received += chunk.len();
        self.progress.update(self.received / self.kind.element_size());
        Ok(())
    }

    /// Verify completeness and hand out the typed array.
    pub fn finish(mut self) -> Result<Payload, DpfError> {
        if self.received != self.total_bytes {
            return Err(DpfError::protocol(format!(
                "stream ended after {} of {} bytes",
                self.received, self.total_bytes
            )));
        }
        self.progress.finish();
        Ok(match (self.kind, self.buffer) {
            (_, Buffer::Int(v)) => Payload::Int(v),
            (_, Buffer::Double(v)) => Payload::Double(v),
            (ArrayKind::Strings, Buffer::Raw(v)) => {
                Payload::Strings(decode_strings(&v, self.string_count)?)
            }
            (_, Buffer::Raw(v)) => Payload::Bytes(v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressRecord, ProgressRecorder};
    use proptest::prelude::*;

    #[test]
    fn empty_buffer_is_one_empty_chunk() {
        let got: Vec<_> = chunks(&[], 16).collect();
        assert_eq!(got.len(), 1);
        assert!(got[0].1.is_empty());
        assert!(got[0].0.last);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_chunk() {
        let buf = [7u8; 32];
        let got: Vec<_> = chunks(&buf, 16).collect();
        assert_eq!(got.len(), 2);
        assert!(got[1].0.last);
        assert_eq!(got[1].0.offset, 16);
    }

    #[test]
    fn strings_survive_trailing_empties_with_count() {
        let v = vec!["a".to_string(), String::new(), "ccc".into(), String::new()];
        let bytes = encode_strings(&v);
        assert_eq!(decode_strings(&bytes, Some(4)).unwrap(), v);
        // without a count trailing empties are stripped, like the engine does
        assert_eq!(decode_strings(&bytes, None).unwrap(), vec!["a", "", "ccc"]);
    }

    #[test]
    fn assembler_reports_progress_above_threshold() {
        let data: Vec<f64> = (0..100).map(f64::from).collect();
        let payload = Payload::Double(data.clone());
        let meta = StreamMetadata::for_payload(&payload);
        let bytes = payload.to_le_bytes();
        let mut rec = ProgressRecorder::new();
        let mut asm = Assembler::new(&meta, 10, Some(&mut rec)).unwrap();
        for (_, c) in chunks(&bytes, aligned_chunk_size(ArrayKind::Double, 80)) {
            asm.push(c).unwrap();
        }
        assert_eq!(asm.finish().unwrap(), payload);
        assert_eq!(rec.records[0], ProgressRecord::Start(Some(100)));
        assert_eq!(rec.updates(), 10);
        assert_eq!(rec.last(), Some(100));
        assert!(rec.finished());
    }

    #[test]
    fn assembler_rejects_short_stream() {
        let payload = Payload::Int(vec![1, 2, 3]);
        let meta = StreamMetadata::for_payload(&payload);
        let mut asm = Assembler::new(&meta, usize::MAX, None).unwrap();
        asm.push(&payload.to_le_bytes()[..4]).unwrap();
        assert!(asm.finish().is_err());
    }

    #[test]
    fn announced_size_only_bounds_the_reservation() {
        let meta = StreamMetadata::new().with(SIZE_INT, 1).with(SIZE_TOT, 1usize << 60);
        let mut asm = Assembler::new(&meta, usize::MAX, None).unwrap();
        match &asm.buffer {
            Buffer::Int(v) => assert!(v.capacity() <= MAX_PREALLOCATION / 4),
            _ => panic!("expected an int buffer"),
        }
        asm.push(&Payload::Int(vec![5, 6]).to_le_bytes()).unwrap();
        assert!(asm.finish().is_err());
    }

    proptest! {
        #[test]
        fn chunk_count_law(len in 0usize..5000, chunk in 1usize..700) {
            let buf = vec![1u8; len];
            let parts: Vec<_> = chunks(&buf, chunk).collect();
            prop_assert_eq!(parts.len(), chunk_count(len, chunk));
            let joined: Vec<u8> = parts.iter().flat_map(|(_, p)| p.iter().copied()).collect();
            prop_assert_eq!(&joined, &buf);
            prop_assert!(parts.iter().all(|(_, p)| p.len() <= chunk));
        }

        #[test]
        fn int_bytes_round_trip(v in proptest::collection::vec(any::<i32>(), 0..300)) {
            let p = Payload::Int(v);
            let back = Payload::from_le_bytes(ArrayKind::Int, &p.to_le_bytes(), None).unwrap();
            prop_assert_eq!(back, p);
        }
    }
}
