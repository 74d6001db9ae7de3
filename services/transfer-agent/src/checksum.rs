// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! SHA-256 checksums, rendered as lowercase hex

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Hash everything `reader` yields
pub async fn checksum_reader<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash the full contents of the file at `path`
pub async fn checksum_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    checksum_reader(&mut file).await
}

pub fn checksum_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_known_vectors() {
        assert_eq!(checksum_bytes(b""), EMPTY);
        assert_eq!(checksum_bytes(b"abc"), ABC);
    }

    #[tokio::test]
    async fn test_reader_matches_bytes() {
        // Larger than one read buffer
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let from_reader = checksum_reader(&mut &data[..]).await.unwrap();
        assert_eq!(from_reader, checksum_bytes(&data));
    }

    #[tokio::test]
    async fn test_checksum_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        tokio::fs::write(&path, b"abc").await.unwrap();

        assert_eq!(checksum_file(&path).await.unwrap(), ABC);
    }

    #[tokio::test]
    async fn test_checksum_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = checksum_file(&dir.path().join("nope")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    quickcheck! {
        fn prop_checksum_is_deterministic(data: Vec<u8>) -> bool {
            let a = checksum_bytes(&data);
            a == checksum_bytes(&data) && a.len() == 64
        }

        fn prop_bit_flip_changes_checksum(data: Vec<u8>, idx: usize, bit: u8) -> bool {
            if data.is_empty() {
                return true;
            }
            let mut flipped = data.clone();
            let i = idx % flipped.len();
            flipped[i] ^= 1 << (bit % 8);
            checksum_bytes(&data) != checksum_bytes(&flipped)
        }
    }
}
