//! Compact identity of one revision: writer key plus per-writer sequence number.
//!
//! Binary layout is the 32-byte writer key followed by the sequence number as an unsigned
//! LEB128 varint. The printable token is the URL-safe, unpadded base64 of those bytes.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::ids::{Seq, WriterKey};

/// Longest varint a `u64` can take.
const MAX_VARINT_LEN: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Version {
    pub writer: WriterKey,
    pub seq: Seq,
}

impl Version {
    pub fn new(writer: WriterKey, seq: Seq) -> Self {
        Self { writer, seq }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WriterKey::LEN + MAX_VARINT_LEN);
        out.extend_from_slice(self.writer.as_bytes());
        encode_varint(self.seq, &mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= WriterKey::LEN {
            return Err(Error::MalformedVersion(format!(
                "expected more than {} bytes, got {}",
                WriterKey::LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..WriterKey::LEN]);
        let (seq, used) = decode_varint(&bytes[WriterKey::LEN..])?;
        if WriterKey::LEN + used != bytes.len() {
            return Err(Error::MalformedVersion("trailing bytes after sequence".into()));
        }
        Ok(Self {
            writer: WriterKey(key),
            seq,
        })
    }

    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| Error::MalformedVersion(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

/// Printable token for the revision `seq` of `writer`.
pub fn version_of(writer: WriterKey, seq: Seq) -> String {
    Version::new(writer, seq).to_token()
}

/// Inverse of [`version_of`].
pub fn decode(token: &str) -> Result<(WriterKey, Seq)> {
    let version = Version::from_token(token)?;
    Ok((version.writer, version.seq))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_token())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Version::from_token(&token).map_err(serde::de::Error::custom)
    }
}

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        let chunk = u64::from(byte & 0x7f);
        let shift = 7 * i as u32;
        if i == MAX_VARINT_LEN - 1 && chunk > 1 {
            return Err(Error::MalformedVersion("varint overflows u64".into()));
        }
        value |= chunk << shift;
        if byte & 0x80 == 0 {
            // A trailing zero group would give the same value a second encoding.
            if i > 0 && byte == 0 {
                return Err(Error::MalformedVersion("non-canonical varint".into()));
            }
            return Ok((value, i + 1));
        }
    }
    Err(Error::MalformedVersion("truncated varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert_eq!(decode_varint(&buf).unwrap(), (value, buf.len()));
        }
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        assert_eq!(buf, vec![0xac, 0x02]);
    }

    #[test]
    fn rejects_short_and_trailing_input() {
        let writer = WriterKey([7; 32]);
        let mut bytes = Version::new(writer, 5).to_bytes();
        assert!(Version::from_bytes(&bytes[..32]).is_err());
        bytes.push(0);
        assert!(matches!(
            Version::from_bytes(&bytes),
            Err(Error::MalformedVersion(_))
        ));
        assert!(matches!(
            Version::from_token("not base64!"),
            Err(Error::MalformedVersion(_))
        ));
    }

    #[test]
    fn truncated_varint_is_malformed() {
        let mut bytes = vec![1u8; 32];
        bytes.push(0x80);
        assert!(matches!(
            Version::from_bytes(&bytes),
            Err(Error::MalformedVersion(_))
        ));
    }

    #[test]
    fn padded_varint_is_malformed() {
        assert!(decode_varint(&[0x80, 0x00]).is_err());
        assert!(decode_varint(&[0x85, 0x80, 0x00]).is_err());
        assert_eq!(decode_varint(&[0x00]).unwrap(), (0, 1));

        let mut bytes = vec![1u8; 32];
        bytes.extend_from_slice(&[0x80, 0x00]);
        assert!(matches!(
            Version::from_bytes(&bytes),
            Err(Error::MalformedVersion(_))
        ));
    }
}
