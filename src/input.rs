use std::fs::{self, File};
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::error::StatError;

/// Reads the whole file into one owned buffer.
pub(crate) fn read_all(path: &Path) -> Result<Vec<u8>, StatError> {
    let bytes = fs::read(path).map_err(|source| StatError::Io {
        path: path.to_owned(),
        source,
    })?;
    debug!("read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Maps the file read-only and shared, so forked children see the same
/// pages instead of copies. Returns `None` for an empty file, which has
/// nothing to map.
pub(crate) fn map_readonly(path: &Path) -> Result<Option<Mmap>, StatError> {
    let io_err = |source: io::Error| StatError::Io {
        path: path.to_owned(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    if len == 0 {
        return Ok(None);
    }

    // SAFETY: the mapping is read-only and lives for the whole run; the file is
    // assumed not to be truncated underneath us while it is mapped.
    let map = unsafe { Mmap::map(&file) }.map_err(|source| StatError::Map {
        path: path.to_owned(),
        source,
    })?;
    debug!("mapped {} bytes of {}", map.len(), path.display());
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.txt");
        assert!(matches!(read_all(&path), Err(StatError::Io { .. })));
        assert!(matches!(map_readonly(&path), Err(StatError::Io { .. })));
    }

    #[test]
    fn empty_file_maps_to_none() {
        let file = NamedTempFile::new().unwrap();
        assert!(map_readonly(file.path()).unwrap().is_none());
        assert!(read_all(file.path()).unwrap().is_empty());
    }

    #[test]
    fn mapping_matches_file_contents() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, mapped world").unwrap();
        file.flush().unwrap();
        let map = map_readonly(file.path()).unwrap().unwrap();
        assert_eq!(&map[..], b"Hello, mapped world");
        assert_eq!(read_all(file.path()).unwrap(), b"Hello, mapped world");
    }
}
