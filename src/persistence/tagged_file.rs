//! Header-tagged files written with the tmp + fsync + rename protocol.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::util::{FileHeader, FileSizeCalculator, HeaderTag, FILE_BIT_SIZE_TAG};

/// Atomically write `header` + `body` to `path`. The header gets a
/// `fileBitSize` tag covering header and body.
pub fn write_tagged_file(path: &Path, mut header: FileHeader, body: &[u8]) -> Result<()> {
    header.put_tag(FILE_BIT_SIZE_TAG, HeaderTag::Integer(0));
    let header_len = header.encoded_len()?;
    let bit_size = ((header_len + body.len()) as i64) * 8;
    header.put_tag(FILE_BIT_SIZE_TAG, HeaderTag::Integer(bit_size));
    let encoded = header.encode()?;

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.write_all(body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        // Directory fsync is best effort; not every platform allows opening a directory
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Read a tagged file, validating its size tag. Returns `None` when the file
/// does not exist.
pub fn read_tagged_file(path: &Path) -> Result<Option<(FileHeader, Vec<u8>)>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    let name = path.display().to_string();
    let (header, header_len) = FileHeader::decode(&data, &name)?;
    let valid =
        FileSizeCalculator::extract_file_size(&header, header_len, &name, data.len() as u64)?;
    Ok(Some((header, data[header_len..valid as usize].to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocDbError;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.dat");
        let header = FileHeader::new().with_tag("serial", HeaderTag::Integer(42));
        write_tagged_file(&path, header, b"payload").unwrap();

        let (header, body) = read_tagged_file(&path).unwrap().unwrap();
        assert_eq!(header.get_tag("serial"), Some(&HeaderTag::Integer(42)));
        assert_eq!(body, b"payload".to_vec());
    }

    #[test]
    fn test_trailing_garbage_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.dat");
        write_tagged_file(&path, FileHeader::new(), b"payload").unwrap();
        let mut data = fs::read(&path).unwrap();
        data.extend_from_slice(b"stale tail");
        fs::write(&path, data).unwrap();

        let (_, body) = read_tagged_file(&path).unwrap().unwrap();
        assert_eq!(body, b"payload".to_vec());
    }

    #[test]
    fn test_truncated_file_fails_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.dat");
        write_tagged_file(&path, FileHeader::new(), b"a longer payload").unwrap();
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 4]).unwrap();

        assert!(matches!(
            read_tagged_file(&path),
            Err(DocDbError::InvalidFileHeader { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(read_tagged_file(&tmp.path().join("nope")).unwrap().is_none());
    }
}
