//! Streaming checksum computation and verification.
//!
//! Checksums identify bundle payloads and installed slot contents. They
//! are computed by streaming data through a digest context in fixed-size
//! chunks, so multi-gigabyte images never have to fit in memory, and are
//! serialized as `"<algorithm>:<lowercase hex>"`.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use digest::DynDigest;
use thiserror::Error;
use tracing::debug;

/// Chunk size for streaming digest computation.
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from checksum computation or verification.
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid checksum string: {0}")]
    InvalidFormat(String),

    #[error("checksum size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, calculated {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for checksum operations.
pub type Result<T> = std::result::Result<T, ChecksumError>;

/// Digest algorithms accepted in manifests and status files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            ChecksumAlgorithm::Md5 => Box::new(md5::Md5::default()),
            ChecksumAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            ChecksumAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            ChecksumAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(ChecksumError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A computed digest: algorithm, lowercase hex digest, and the number of
/// bytes that went into it.
///
/// Two checksums are equal when algorithm and digest match; the size is
/// carried as metadata for cheap early rejection during verification.
#[derive(Debug, Clone)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
    pub size: u64,
}

impl PartialEq for Checksum {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

impl Eq for Checksum {}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: impl Into<String>, size: u64) -> Self {
        Self {
            algorithm,
            digest: digest.into(),
            size,
        }
    }

    /// Compute the checksum of an in-memory buffer.
    pub fn of_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            algorithm,
            digest: hex::encode(hasher.finalize()),
            size: data.len() as u64,
        }
    }

    /// Compute the checksum of everything a reader yields, streaming in
    /// fixed-size chunks.
    pub fn of_reader<R: Read>(algorithm: ChecksumAlgorithm, mut reader: R) -> Result<Self> {
        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(Self {
            algorithm,
            digest: hex::encode(hasher.finalize()),
            size,
        })
    }

    /// Compute the checksum of a file's contents.
    pub fn of_file(algorithm: ChecksumAlgorithm, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let checksum = Self::of_reader(algorithm, file)?;
        debug!(
            path = %path.display(),
            algorithm = %algorithm,
            bytes = checksum.size,
            "calculated file checksum"
        );
        Ok(checksum)
    }

    /// Verify a file against this checksum.
    ///
    /// The file size is checked first when this checksum carries one, so
    /// an obviously wrong file is rejected without a full digest pass.
    /// The returned mismatch error carries both digests for diagnostics.
    pub fn verify_file(&self, path: &Path) -> Result<()> {
        if self.size > 0 {
            let actual = std::fs::metadata(path)?.len();
            if actual != self.size {
                return Err(ChecksumError::SizeMismatch {
                    expected: self.size,
                    actual,
                });
            }
        }

        let computed = Self::of_file(self.algorithm, path)?;
        if computed.digest != self.digest {
            return Err(ChecksumError::Mismatch {
                expected: self.digest.clone(),
                actual: computed.digest,
            });
        }

        Ok(())
    }

    /// Verify an in-memory buffer against this checksum.
    pub fn verify_bytes(&self, data: &[u8]) -> Result<()> {
        if self.size > 0 && data.len() as u64 != self.size {
            return Err(ChecksumError::SizeMismatch {
                expected: self.size,
                actual: data.len() as u64,
            });
        }

        let computed = Self::of_bytes(self.algorithm, data);
        if computed.digest != self.digest {
            return Err(ChecksumError::Mismatch {
                expected: self.digest.clone(),
                actual: computed.digest,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    /// Parse the `"<algorithm>:<hex>"` form. The size is unknown for a
    /// parsed checksum and recorded as zero.
    fn from_str(s: &str) -> Result<Self> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| ChecksumError::InvalidFormat(s.to_string()))?;

        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::InvalidFormat(s.to_string()));
        }

        Ok(Self {
            algorithm: algo.parse()?,
            digest: digest.to_ascii_lowercase(),
            size: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_sha256_digest() {
        let checksum = Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"hello world");
        assert_eq!(
            checksum.digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(checksum.size, 11);
    }

    #[test]
    fn roundtrip_all_algorithms() {
        let inputs: &[&[u8]] = &[b"", b"x", &[0xabu8; 3 * 1024 * 1024]];
        let algos = [
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha1,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Sha512,
        ];

        for algo in algos {
            for input in inputs {
                let checksum = Checksum::of_bytes(algo, input);
                checksum.verify_bytes(input).unwrap();
            }
        }
    }

    #[test]
    fn file_and_reader_agree_with_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x5au8; 200_000];
        file.write_all(&data).unwrap();

        let from_file = Checksum::of_file(ChecksumAlgorithm::Sha256, file.path()).unwrap();
        let from_bytes = Checksum::of_bytes(ChecksumAlgorithm::Sha256, &data);

        assert_eq!(from_file, from_bytes);
        assert_eq!(from_file.size, data.len() as u64);
        from_file.verify_file(file.path()).unwrap();
    }

    #[test]
    fn mismatch_carries_both_digests() {
        let checksum = Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"original");
        let err = checksum.verify_bytes(b"tampered").unwrap_err();
        match err {
            ChecksumError::Mismatch { expected, actual } => {
                assert_eq!(expected, checksum.digest);
                assert_ne!(actual, checksum.digest);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn size_rejects_before_digest() {
        let mut checksum = Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"abcd");
        checksum.size = 99;
        let err = checksum.verify_bytes(b"abcd").unwrap_err();
        assert!(matches!(
            err,
            ChecksumError::SizeMismatch {
                expected: 99,
                actual: 4
            }
        ));
    }

    #[test]
    fn string_roundtrip() {
        let checksum = Checksum::of_bytes(ChecksumAlgorithm::Sha1, b"data");
        let parsed: Checksum = checksum.to_string().parse().unwrap();
        assert_eq!(parsed, checksum);
    }

    #[test]
    fn unsupported_algorithm_is_an_error() {
        let err = "crc32:deadbeef".parse::<Checksum>().unwrap_err();
        assert!(matches!(err, ChecksumError::UnsupportedAlgorithm(_)));
        assert!("none".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn malformed_strings_rejected() {
        for s in ["sha256", "sha256:", "sha256:zzzz", ""] {
            assert!(s.parse::<Checksum>().is_err(), "accepted {s:?}");
        }
    }

    #[test]
    fn equality_ignores_size() {
        let a = Checksum::new(ChecksumAlgorithm::Sha256, "ab12", 10);
        let b = Checksum::new(ChecksumAlgorithm::Sha256, "ab12", 0);
        assert_eq!(a, b);
    }
}
