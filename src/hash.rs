// src/hash.rs

//! Artifact hashes in requirement-file form
//!
//! Hashes travel as `algorithm:hex` strings, the form `--hash=` options use.
//! New hashes are always computed with [`FAVORITE_HASH`]; SHA-384 and
//! SHA-512 are accepted when reading hashes recorded by other tools.

use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use thiserror::Error;

/// Digest algorithms accepted in `--hash=` options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

/// The algorithm used for freshly computed artifact hashes
pub const FAVORITE_HASH: HashAlgorithm = HashAlgorithm::Sha256;

impl HashAlgorithm {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Number of hex digits in a digest
    const fn hex_digits(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Why a `--hash=` value was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("hash '{0}' must be of the form algorithm:hex")]
    MissingAlgorithm(String),

    #[error("unsupported hash algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("{algorithm} digest must have {expected} hex digits, got {got}")]
    WrongLength {
        algorithm: HashAlgorithm,
        expected: usize,
        got: usize,
    },

    #[error("digest '{0}' is not hexadecimal")]
    NotHex(String),
}

/// Digest of one distribution artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactHash {
    pub algorithm: HashAlgorithm,
    /// Lower-case hex digest
    pub digest: String,
}

impl ArtifactHash {
    /// Parse `algorithm:hex`, normalizing the digest to lower case
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let (algorithm, digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::MissingAlgorithm(s.to_string()))?;
        let algorithm: HashAlgorithm = algorithm.parse()?;

        if digest.len() != algorithm.hex_digits() {
            return Err(HashError::WrongLength {
                algorithm,
                expected: algorithm.hex_digits(),
                got: digest.len(),
            });
        }
        if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::NotHex(digest.to_string()));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

impl FromStr for ArtifactHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(data),
            Self::Sha384(hasher) => hasher.update(data),
            Self::Sha512(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
            Self::Sha384(hasher) => hex::encode(hasher.finalize()),
            Self::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Hash everything `reader` yields
///
/// Reads in fixed-size chunks so whole archives never sit in memory.
pub fn hash_reader<R: Read + ?Sized>(
    algorithm: HashAlgorithm,
    reader: &mut R,
) -> io::Result<ArtifactHash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ArtifactHash {
        algorithm,
        digest: hasher.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_SHA256: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    #[test]
    fn test_hash_reader() {
        let hash = hash_reader(FAVORITE_HASH, &mut Cursor::new(b"Hello, World!")).unwrap();
        assert_eq!(hash.to_string(), HELLO_SHA256);
    }

    #[test]
    fn test_hash_reader_spans_chunks() {
        let data = vec![7u8; 20_000];
        let whole = hash_reader(HashAlgorithm::Sha512, &mut Cursor::new(&data)).unwrap();
        let chained = hash_reader(
            HashAlgorithm::Sha512,
            &mut Cursor::new(&data[..10_000]).chain(Cursor::new(&data[10_000..])),
        )
        .unwrap();
        assert_eq!(whole, chained);
        assert_eq!(whole.digest.len(), 128);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let hash: ArtifactHash = HELLO_SHA256.to_uppercase().parse().unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);
        assert_eq!(hash.to_string(), HELLO_SHA256);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ArtifactHash::parse("abc"),
            Err(HashError::MissingAlgorithm("abc".to_string()))
        );
        assert!(matches!(
            ArtifactHash::parse("md5:abc"),
            Err(HashError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            ArtifactHash::parse("sha256:abc"),
            Err(HashError::WrongLength { expected: 64, got: 3, .. })
        ));
        let not_hex = format!("sha256:{}", "z".repeat(64));
        assert!(matches!(ArtifactHash::parse(&not_hex), Err(HashError::NotHex(_))));
    }
}
