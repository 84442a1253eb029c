use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MD5 digest of a file's content. The all-zero value is a real digest, not "missing".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash([u8; 16]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),
    #[error("digest must be 16 bytes, got {0}")]
    Length(usize),
}

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| HashParseError::InvalidHex(s.to_string()))?;
        let arr: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for Hash {
    type Error = HashParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Hash> for String {
    fn from(value: Hash) -> Self {
        value.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_is_distinct_from_empty_content() {
        let empty = Hash::of_bytes(b"");
        assert!(!empty.is_zero());
        assert_eq!(empty.to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn parses_its_own_display() {
        let h = Hash::of_bytes(b"plugin");
        let parsed: Hash = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
        assert!("abc".parse::<Hash>().is_err());
        assert_eq!("00".parse::<Hash>(), Err(HashParseError::Length(1)));
    }
}
