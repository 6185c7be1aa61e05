//! Out-of-band size metadata sent ahead of a stream.

use super::{ArrayKind, Payload};
use crate::dpf_error::DpfError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Total payload size in bytes.
pub const SIZE_TOT: &str = "size_tot";
/// Element count of an int32 stream.
pub const SIZE_INT: &str = "size_int";
/// Element count of a float64 stream.
pub const SIZE_DOUBLE: &str = "size_double";
/// Byte count of a raw or string stream.
pub const SIZE_BYTES: &str = "size_bytes";
/// Number of strings carried by a string stream.
pub const NUM_STRINGS: &str = "num_strings";
/// Number of files in a file-transfer stream.
pub const NUM_FILES: &str = "num_files";
/// `"double"` for float64 streams.
pub const FLOAT_OR_DOUBLE: &str = "float_or_double";

/// String map carried in the initial metadata of a streaming call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata(BTreeMap<String, String>);

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size keys describing `payload`.
    pub fn for_payload(payload: &Payload) -> Self {
        let mut m = Self::new();
        match payload {
            Payload::Int(v) => {
                m.insert(SIZE_TOT, v.len() * 4);
                m.insert(SIZE_INT, v.len());
            }
            Payload::Double(v) => {
                m.insert(SIZE_TOT, v.len() * 8);
                m.insert(SIZE_DOUBLE, v.len());
                m.insert(FLOAT_OR_DOUBLE, "double");
            }
            Payload::Bytes(v) => {
                m.insert(SIZE_TOT, v.len());
                m.insert(SIZE_BYTES, v.len());
            }
            Payload::Strings(v) => {
                let bytes: usize = v.iter().map(|s| s.len() + 1).sum();
                m.insert(SIZE_TOT, bytes);
                m.insert(SIZE_BYTES, bytes);
                m.insert(NUM_STRINGS, v.len());
            }
        }
        m
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Element type implied by the size keys.
    pub fn array_kind(&self) -> Result<ArrayKind, DpfError> {
        if self.contains(SIZE_INT) {
            Ok(ArrayKind::Int)
        } else if self.contains(SIZE_DOUBLE) {
            Ok(ArrayKind::Double)
        } else if self.contains(NUM_STRINGS) {
            Ok(ArrayKind::Strings)
        } else if self.contains(SIZE_BYTES) {
            Ok(ArrayKind::Bytes)
        } else {
            Err(DpfError::protocol("stream metadata carries no size key"))
        }
    }

    pub fn total_bytes(&self) -> Result<usize, DpfError> {
        self.get(SIZE_TOT)
            .ok_or_else(|| DpfError::protocol("stream metadata lacks `size_tot`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_recovered() {
        let cases = [
            Payload::Int(vec![1, 2]),
            Payload::Double(vec![1.0]),
            Payload::Bytes(vec![0; 5]),
            Payload::Strings(vec!["ab".into()]),
        ];
        for p in cases {
            let m = StreamMetadata::for_payload(&p);
            assert_eq!(m.array_kind().unwrap(), p.kind());
            assert_eq!(m.total_bytes().unwrap(), p.to_le_bytes().len());
        }
    }
}
