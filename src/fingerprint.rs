use md5::{Digest, Md5};
use std::fmt;
use std::io::Write;
use std::path::Path;

use crate::error::PatchError;

/// Whole-file digest as written in a catalogue. The hex length picks the
/// algorithm: 32 digits for MD5, 64 for BLAKE3. Anything else is kept as
/// `Other` and never matches a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Md5([u8; 16]),
    Blake3([u8; 32]),
    Other(String),
}

impl Fingerprint {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let bytes = hex::decode(text).unwrap_or_default();
        if let Ok(digest) = <[u8; 16]>::try_from(bytes.as_slice()) {
            Fingerprint::Md5(digest)
        } else if let Ok(digest) = <[u8; 32]>::try_from(bytes.as_slice()) {
            Fingerprint::Blake3(digest)
        } else {
            Fingerprint::Other(text.to_string())
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Fingerprint::Other(_))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Md5(d) => write!(f, "md5:{}", hex::encode(d)),
            Fingerprint::Blake3(d) => write!(f, "blake3:{}", hex::encode(d)),
            Fingerprint::Other(text) => write!(f, "unsupported:{text}"),
        }
    }
}

/// Digests of a target file under every supported algorithm, computed in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub md5: [u8; 16],
    pub blake3: [u8; 32],
}

impl FileDigest {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut sink = DigestSink::new();
        sink.update(data);
        sink.finish()
    }

    /// Stream-hash a file.
    /// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
    pub fn of_file(path: &Path) -> Result<Self, PatchError> {
        let file = std::fs::File::open(path).map_err(|e| PatchError::io(path, e))?;
        let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
        let mut sink = DigestSink::new();
        std::io::copy(&mut reader, &mut sink).map_err(|e| PatchError::io(path, e))?;
        Ok(sink.finish())
    }

    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        match fingerprint {
            Fingerprint::Md5(d) => &self.md5 == d,
            Fingerprint::Blake3(d) => &self.blake3 == d,
            Fingerprint::Other(_) => false,
        }
    }
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "md5 {}", hex::encode(&self.md5))
    }
}

/// Feeds every write into both hashers.
struct DigestSink {
    md5: Md5,
    blake3: blake3::Hasher,
}

impl DigestSink {
    fn new() -> Self {
        Self {
            md5: Md5::new(),
            blake3: blake3::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.blake3.update(data);
    }

    fn finish(self) -> FileDigest {
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&self.md5.finalize());
        FileDigest {
            md5,
            blake3: *self.blake3.finalize().as_bytes(),
        }
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        let digest = FileDigest::of_bytes(b"abc");
        assert_eq!(
            hex::encode(&digest.md5),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        let fp = Fingerprint::parse("900150983CD24FB0D6963F7D28E17F72");
        assert!(digest.matches(&fp));
    }

    #[test]
    fn test_blake3_fingerprint() {
        let digest = FileDigest::of_bytes(b"abc");
        let hex = blake3::hash(b"abc").to_hex().to_string();
        let fp = Fingerprint::parse(&hex);
        assert!(matches!(fp, Fingerprint::Blake3(_)));
        assert!(digest.matches(&fp));
        assert!(!FileDigest::of_bytes(b"abd").matches(&fp));
    }

    #[test]
    fn test_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(FileDigest::of_file(&path).unwrap(), FileDigest::of_bytes(&data));
    }

    #[test]
    fn test_unsupported_digests_never_match() {
        let digest = FileDigest::of_bytes(b"");
        // SHA-1 of the empty input
        let sha1 = Fingerprint::parse("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            sha1,
            Fingerprint::Other("da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string())
        );
        assert!(!sha1.is_supported());
        assert!(!digest.matches(&sha1));

        for text in ["deadbeef", "", "xx112233445566778899aabbccddeeff"] {
            let fp = Fingerprint::parse(text);
            assert!(matches!(fp, Fingerprint::Other(_)), "{text}");
            assert!(!digest.matches(&fp));
        }
    }
}
