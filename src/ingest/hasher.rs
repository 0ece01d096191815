use std::fs::File;
use std::io::{Read, BufReader};
use std::path::Path;
use sha2::{Digest, Sha256};
use memmap2::MmapOptions;

use crate::error::{Error, Result};

const MMAP_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MB

/// Hex encoded SHA-256 of the image content. Used as the cache key, so the
/// same bytes always map to the same stored image whatever the file is called.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();

    if len > MMAP_THRESHOLD {
        // SAFETY: the file is a private temp copy nobody else truncates.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| Error::io(path, e))?;
        return Ok(fingerprint(&mmap));
    }

    let mut bytes = Vec::with_capacity(len as usize);
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::io(path, e))?;
    Ok(fingerprint(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_is_content_addressed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.png");
        let b = dir.path().join("renamed.jpg");
        File::create(&a)?.write_all(b"same bytes")?;
        File::create(&b)?.write_all(b"same bytes")?;

        assert_eq!(fingerprint_file(&a)?, fingerprint_file(&b)?);
        assert_eq!(fingerprint_file(&a)?, fingerprint(b"same bytes"));
        assert_ne!(fingerprint(b"same bytes"), fingerprint(b"other bytes"));
        Ok(())
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = fingerprint_file(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
