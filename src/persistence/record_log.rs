use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{DocDbError, Result};
use crate::serial::SerialNum;

const RECORD_HEADER_LEN: usize = 16;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub serial: SerialNum,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Append-only log of serial-tagged records.
///
/// Record format:
/// - u32 payload length (little endian)
/// - u32 crc32 over serial bytes and payload
/// - u64 serial (little endian)
/// - raw payload bytes
///
/// A short or checksum-failing record at the very end of the file is a torn
/// write and is cut off when the log is read back. A bad record followed by
/// more data is corruption and is reported.
pub struct RecordLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RecordLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn checksum(serial: SerialNum, payload: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&serial.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Append a record and return its offset.
    pub fn append(&self, serial: SerialNum, payload: &[u8]) -> Result<u64> {
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;

        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&Self::checksum(serial, payload).to_le_bytes());
        buf.extend_from_slice(&serial.to_le_bytes());
        buf.extend_from_slice(payload);
        file.write_all(&buf)?;
        Ok(offset)
    }

    /// Make every appended record durable.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Current length of the log in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read every intact record, cutting off a torn tail if one is found.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            if data.len() - pos < RECORD_HEADER_LEN {
                break;
            }
            let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap_or_default()) as usize;
            let crc = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap_or_default());
            let serial =
                u64::from_le_bytes(data[pos + 8..pos + 16].try_into().unwrap_or_default());
            let start = pos + RECORD_HEADER_LEN;
            let end = start + len;
            if end > data.len() {
                break;
            }
            let payload = &data[start..end];
            if Self::checksum(serial, payload) != crc {
                if end == data.len() {
                    break;
                }
                return Err(DocDbError::CorruptRecord {
                    file: self.path.display().to_string(),
                    offset: pos as u64,
                    reason: "checksum mismatch".to_string(),
                });
            }
            records.push(LogRecord {
                serial,
                offset: pos as u64,
                payload: payload.to_vec(),
            });
            pos = end;
        }

        if pos < data.len() {
            warn!(
                file = %self.path.display(),
                valid_bytes = pos,
                total_bytes = data.len(),
                "Cutting torn tail off record log"
            );
            file.set_len(pos as u64)?;
        }
        Ok(records)
    }

    /// Drop everything from `offset` onwards.
    pub fn truncate(&self, offset: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(offset)?;
        file.sync_data()?;
        Ok(())
    }

    /// Empty the log.
    pub fn reset(&self) -> Result<()> {
        self.truncate(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
