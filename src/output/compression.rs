//! Output Compression
//!
//! Each call to [`Compression::compress`] produces one complete gzip member.
//! A worker compresses every payload independently, so a committed object is a
//! concatenation of members. RFC 1952 allows this and streaming readers such as
//! `gzip -d` or flate2's `MultiGzDecoder` return the concatenated input.

use flate2::write::GzEncoder;
use flate2::Compression as GzipLevel;
use serde::{Deserialize, Serialize};
use std::io::{Result as IoResult, Write};

/// Compression applied to payloads before they reach the object writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Bytes are written as-is
    #[default]
    None,
    /// Each payload becomes a self-contained gzip member (.gz)
    Gzip,
}

impl Compression {
    /// File extension suffix appended to rendered object names
    pub fn extension_suffix(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Compress one payload
    pub fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Parse from a config string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Some(Compression::None),
            "gzip" | "gz" => Some(Compression::Gzip),
            _ => None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn gunzip_all(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_parse() {
        assert_eq!(Compression::parse("gzip"), Some(Compression::Gzip));
        assert_eq!(Compression::parse("GZIP"), Some(Compression::Gzip));
        assert_eq!(Compression::parse("none"), Some(Compression::None));
        assert_eq!(Compression::parse(""), Some(Compression::None));
        assert_eq!(Compression::parse("zstd"), None);
    }

    #[test]
    fn test_extension_suffix() {
        assert_eq!(Compression::None.extension_suffix(), "");
        assert_eq!(Compression::Gzip.extension_suffix(), ".gz");
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"abz".to_vec();
        assert_eq!(Compression::None.compress(&data).unwrap(), data);
    }

    #[test]
    fn test_gzip_members_concatenate() {
        let mut object = Compression::Gzip.compress(b"first line\n").unwrap();
        object.extend(Compression::Gzip.compress(b"second line\n").unwrap());

        assert_eq!(gunzip_all(&object), b"first line\nsecond line\n");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Compression::Gzip).unwrap();
        assert_eq!(json, "\"gzip\"");
        let parsed: Compression = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, Compression::None);
    }
}
