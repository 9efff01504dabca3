// SPDX-License-Identifier: PMPL-1.0-or-later

//! Streaming file digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used when streaming file contents into a hasher.
pub const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 64,
            HashAlgorithm::Sha384 => 96,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Hash everything `reader` yields and return the lowercase hex digest.
    pub fn hash_reader<R: Read>(&self, reader: R) -> io::Result<String> {
        match self {
            HashAlgorithm::Sha224 => digest_reader::<Sha224, _>(reader),
            HashAlgorithm::Sha256 => digest_reader::<Sha256, _>(reader),
            HashAlgorithm::Sha384 => digest_reader::<Sha384, _>(reader),
            HashAlgorithm::Sha512 => digest_reader::<Sha512, _>(reader),
            HashAlgorithm::Blake3 => blake3_reader(reader),
        }
    }

    pub fn hash_file(&self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        self.hash_reader(file)
    }

    pub fn hash_bytes(&self, data: &[u8]) -> String {
        // Reading from a slice cannot fail.
        self.hash_reader(data).unwrap_or_default()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn fill_blocks<R: Read>(mut reader: R, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => sink(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn digest_reader<D: Digest, R: Read>(reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    fill_blocks(reader, |block| hasher.update(block))?;
    Ok(hex::encode(hasher.finalize()))
}

fn blake3_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    fill_blocks(reader, |block| {
        hasher.update(block);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            HashAlgorithm::Sha256.hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            HashAlgorithm::Sha256.hash_bytes(b"Hello World"),
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
        );
        assert_eq!(
            HashAlgorithm::Blake3.hash_bytes(b""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_hex_lengths_match() {
        for alg in [
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
            HashAlgorithm::Blake3,
        ] {
            assert_eq!(alg.hash_bytes(b"abc").len(), alg.hex_len(), "{alg}");
        }
    }

    #[test]
    fn test_streaming_matches_one_shot_across_blocks() {
        let data: Vec<u8> = (0..(BLOCK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = HashAlgorithm::Sha512.hash_reader(&data[..]).unwrap();
        let mut hasher = Sha512::new();
        hasher.update(&data);
        assert_eq!(streamed, hex::encode(hasher.finalize()));
    }
}
