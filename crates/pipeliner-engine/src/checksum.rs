//! File digests for `--checksum` and `--extension`.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{EngineError, Result};

/// Digest algorithm, chosen by the length of the expected hex digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// `Sha256` for 64 hex characters, `Sha512` for 128.
    pub fn for_digest(hex_digest: &str) -> Option<Self> {
        match hex_digest.len() {
            64 => Some(Algorithm::Sha256),
            128 => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

/// Lowercase hex digest of a file.
pub fn file_digest(path: &Path, algorithm: Algorithm) -> Result<String> {
    let mut file = File::open(path)?;
    let digest = match algorithm {
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            hex::encode(hasher.finalize())
        }
        Algorithm::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)?;
            hex::encode(hasher.finalize())
        }
    };
    Ok(digest)
}

/// True if the file's digest matches `expected` (case-insensitive).
pub fn verify(path: &Path, expected: &str) -> Result<bool> {
    let expected = expected.trim();
    let algorithm = Algorithm::for_digest(expected)
        .ok_or_else(|| EngineError::Syntax(format!("unsupported checksum [{}]", expected)))?;
    let actual = file_digest(path, algorithm)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_SHA512: &str = "9b71d224bd62f3785d96d46ad3ea3d73319bfbc2890caadae2dff72519673ca72323c3d99ba5c11d7c7acc6e14b8c5da0c4663475c2e5c3adef46f73bcdec043";

    fn hello_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();
        path
    }

    #[test]
    fn test_algorithm_by_length() {
        assert_eq!(Algorithm::for_digest(HELLO_SHA256), Some(Algorithm::Sha256));
        assert_eq!(Algorithm::for_digest(HELLO_SHA512), Some(Algorithm::Sha512));
        assert_eq!(Algorithm::for_digest("abc"), None);
    }

    #[test]
    fn test_verify_matches() {
        let dir = TempDir::new().unwrap();
        let path = hello_file(&dir);
        assert!(verify(&path, HELLO_SHA256).unwrap());
        assert!(verify(&path, &HELLO_SHA512.to_uppercase()).unwrap());
    }

    #[test]
    fn test_verify_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = hello_file(&dir);
        let wrong = "0".repeat(64);
        assert!(!verify(&path, &wrong).unwrap());
    }

    #[test]
    fn test_unsupported_length() {
        let dir = TempDir::new().unwrap();
        let path = hello_file(&dir);
        assert!(matches!(verify(&path, "abcd"), Err(EngineError::Syntax(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = verify(Path::new("/nonexistent/file"), HELLO_SHA256).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
