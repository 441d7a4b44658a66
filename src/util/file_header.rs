//! Generic tagged file header and the file size boundary check.
//!
//! Every snapshot file starts with:
//! - u32 magic (little endian)
//! - u32 length of the encoded tag map
//! - bincode tag map
//!
//! The `fileBitSize` tag records how many bits of the file are valid,
//! header included. Bytes past that are a torn or stale tail.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{DocDbError, Result};

pub const FILE_BIT_SIZE_TAG: &str = "fileBitSize";

const HEADER_MAGIC: u32 = 0x5344_4248; // "SDBH"
const PREFIX_LEN: usize = 8;

/// A single header tag value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderTag {
    Integer(i64),
    Text(String),
}

impl HeaderTag {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HeaderTag::Integer(v) => Some(*v),
            HeaderTag::Text(_) => None,
        }
    }
}

/// Tag map stored at the start of persisted component files
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    tags: BTreeMap<String, HeaderTag>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, name: impl Into<String>, tag: HeaderTag) -> Self {
        self.tags.insert(name.into(), tag);
        self
    }

    pub fn put_tag(&mut self, name: impl Into<String>, tag: HeaderTag) {
        self.tags.insert(name.into(), tag);
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn get_tag(&self, name: &str) -> Option<&HeaderTag> {
        self.tags.get(name)
    }

    /// Encoded length of this header in bytes. Integer tags are fixed width,
    /// so changing an integer value never changes the length.
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(PREFIX_LEN + bincode::serialized_size(&self.tags)? as usize)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.tags)?;
        let mut out = Vec::with_capacity(PREFIX_LEN + body.len());
        out.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a header from the start of `data`, returning it together with
    /// its length in bytes.
    pub fn decode(data: &[u8], file_name: &str) -> Result<(Self, usize)> {
        let invalid = |reason: String| DocDbError::InvalidFileHeader {
            file: file_name.to_string(),
            reason,
        };
        if data.len() < PREFIX_LEN {
            return Err(invalid(format!("file is only {} bytes", data.len())));
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != HEADER_MAGIC {
            return Err(invalid(format!("bad magic {:#x}", magic)));
        }
        let body_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let end = PREFIX_LEN + body_len;
        if data.len() < end {
            return Err(invalid(format!(
                "header claims {} bytes but file has {}",
                end,
                data.len()
            )));
        }
        let tags: BTreeMap<String, HeaderTag> = bincode::deserialize(&data[PREFIX_LEN..end])?;
        Ok((Self { tags }, end))
    }
}

/// Boundary check for the `fileBitSize` header tag.
pub struct FileSizeCalculator;

impl FileSizeCalculator {
    /// Validate the size tag of `header` against the header length and the
    /// actual file length. Returns the usable file size in bytes.
    ///
    /// Files without the tag pass unchanged.
    pub fn extract_file_size(
        header: &FileHeader,
        header_len: usize,
        file_name: &str,
        file_size: u64,
    ) -> Result<u64> {
        let Some(tag) = header.get_tag(FILE_BIT_SIZE_TAG) else {
            return Ok(file_size);
        };
        let fail = |reason: String| {
            error!(file = file_name, %reason, "Bad header file size tag");
            Err(DocDbError::InvalidFileHeader {
                file: file_name.to_string(),
                reason,
            })
        };
        let file_bit_size = match tag.as_integer() {
            Some(bits) if bits >= 0 => bits as u64,
            _ => return fail(format!("fileBitSize tag is not a non-negative integer: {:?}", tag)),
        };
        let file_byte_size = file_bit_size / 8;
        if file_bit_size % 8 != 0 {
            return fail(format!(
                "fileBitSize={} which is not a multiple of 8",
                file_bit_size
            ));
        }
        if file_byte_size < header_len as u64 {
            return fail(format!(
                "fileBitSize={} but header is {} bits",
                file_bit_size,
                header_len as u64 * 8
            ));
        }
        if file_byte_size > file_size {
            return fail(format!(
                "fileBitSize={} but whole file size is {} bits",
                file_bit_size,
                file_size * 8
            ));
        }
        Ok(file_byte_size)
    }
}
