//! Streaming content digests
//!
//! Store and Load never buffer whole objects: bytes are copied from the source
//! into the destination through a [`HashingWriter`], which feeds every chunk to
//! the digest on its way through. The digest returned by Store for some content
//! is therefore byte-for-byte comparable with the one returned by Load.

use crate::error::Result;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Digest algorithm used for stored objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, the archive's historical integrity digest
    #[default]
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Start a new incremental hasher for this algorithm
    pub fn hasher(self) -> Hasher {
        match self {
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Digest length in bytes
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithm {
    type Err = crate::error::TresorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(crate::error::TresorError::InvalidConfiguration(format!(
                "unknown hash algorithm: {}",
                other
            ))),
        }
    }
}

/// Incremental hasher over one of the supported algorithms
#[derive(Clone)]
pub enum Hasher {
    /// MD5 state
    Md5(Md5),
    /// SHA-1 state
    Sha1(Sha1),
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-512 state
    Sha512(Sha512),
}

impl Hasher {
    /// Feed bytes into the digest
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the raw digest bytes
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hasher::Md5(_) => "Md5",
            Hasher::Sha1(_) => "Sha1",
            Hasher::Sha256(_) => "Sha256",
            Hasher::Sha512(_) => "Sha512",
        };
        f.debug_tuple("Hasher").field(&name).finish()
    }
}

/// Writer that forwards every byte to `inner` and to a digest
///
/// Only bytes accepted by the inner writer are hashed, so a short write never
/// leaves the digest ahead of the destination.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap `inner`, hashing with `algorithm`
    pub fn new(inner: W, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Flush the inner writer and return it together with the digest
    pub fn finish(mut self) -> io::Result<(W, Vec<u8>)> {
        self.inner.flush()?;
        Ok((self.inner, self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `source` into `dest` while hashing
///
/// Returns the digest and the number of bytes copied.
pub fn copy_hashed<R, W>(source: &mut R, dest: W, algorithm: HashAlgorithm) -> Result<(Vec<u8>, u64)>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut writer = HashingWriter::new(dest, algorithm);
    let copied = io::copy(source, &mut writer)?;
    let (_, digest) = writer.finish()?;
    Ok((digest, copied))
}

/// Hash an in-memory buffer
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        let digest = hash_data(b"Hello world!", HashAlgorithm::Md5);
        assert_eq!(hex::encode(digest), "86fb269d190d2c85f6e0468ceca42a20");
    }

    #[test]
    fn test_sha1_known_vector() {
        let digest = hash_data(b"Hello world!", HashAlgorithm::Sha1);
        assert_eq!(hex::encode(&digest), "d3486ae9136e7856bc42212385ea797094475802");
        assert_eq!(digest.len(), HashAlgorithm::Sha1.output_len());
    }

    #[test]
    fn test_copy_hashed_matches_buffer_hash() {
        let content = b"Doc #1.1 Page 1".repeat(1000);
        let mut dest = Vec::new();

        let (digest, copied) =
            copy_hashed(&mut content.as_slice(), &mut dest, HashAlgorithm::Sha256).unwrap();

        assert_eq!(copied, content.len() as u64);
        assert_eq!(dest, content);
        assert_eq!(digest, hash_data(&content, HashAlgorithm::Sha256));
        assert_eq!(digest.len(), HashAlgorithm::Sha256.output_len());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("sha512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert_eq!("SHA1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::Sha1.to_string(), "sha1");
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }
}
