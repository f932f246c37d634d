//! Checksum-based shard file integrity.

use std::io;
use std::path::Path;

use tokio::io::AsyncReadExt;
use xxhash_rust::xxh64::Xxh64;

use crate::constants::HASH_READ_BUFFER_BYTES;

/// Streaming xxhash64 (seed 0) over a file's contents.
pub async fn xxhash64_file(path: &Path) -> io::Result<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; HASH_READ_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.digest())
}

/// A shard file is corrupt iff its length differs from the expected length,
/// or a checksum is known and the file's xxhash64 does not match it.
pub async fn is_file_corrupt(
    path: &Path,
    expected_length: u64,
    expected_xxhash64: Option<u64>,
) -> io::Result<bool> {
    let length = tokio::fs::metadata(path).await?.len();
    if length != expected_length {
        return Ok(true);
    }
    if let Some(expected) = expected_xxhash64
        && xxhash64_file(path).await? != expected
    {
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use xxhash_rust::xxh64::xxh64;

    use super::*;

    #[tokio::test]
    async fn hashes_match_the_one_shot_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let contents = b"the quick brown fox";
        tokio::fs::write(&path, contents).await.unwrap();

        assert_eq!(xxhash64_file(&path).await.unwrap(), xxh64(contents, 0));
    }

    #[tokio::test]
    async fn detects_length_mismatch_without_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"abc").await.unwrap();

        assert!(is_file_corrupt(&path, 4, None).await.unwrap());
        assert!(!is_file_corrupt(&path, 3, None).await.unwrap());
    }

    #[tokio::test]
    async fn detects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let contents = b"shard bytes";
        tokio::fs::write(&path, contents).await.unwrap();

        let good = xxh64(contents, 0);
        assert!(!is_file_corrupt(&path, contents.len() as u64, Some(good)).await.unwrap());
        assert!(
            is_file_corrupt(&path, contents.len() as u64, Some(good ^ 1))
                .await
                .unwrap()
        );
    }
}
