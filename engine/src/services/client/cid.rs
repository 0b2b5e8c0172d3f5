//! Blob identifier validation
//!
//! Blob ids returned by enumeration are untrusted network input. They are
//! parsed as real CIDs before being used in a download URL.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A validated CIDv1 blob identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobIdError {
    #[error("expected CID, got empty string")]
    Empty,
    #[error("CID is too long (256 chars max)")]
    TooLong,
    #[error("CIDv0 not allowed for blobs")]
    CidV0NotAllowed,
    #[error("invalid CID: {0}")]
    Invalid(String),
}

impl BlobId {
    pub fn parse(raw: &str) -> Result<Self, BlobIdError> {
        if raw.is_empty() {
            return Err(BlobIdError::Empty);
        }
        if raw.len() > 256 {
            return Err(BlobIdError::TooLong);
        }

        let parsed =
            ::cid::Cid::from_str(raw).map_err(|e| BlobIdError::Invalid(e.to_string()))?;
        if parsed.version() == ::cid::Version::V0 {
            return Err(BlobIdError::CidV0NotAllowed);
        }

        Ok(BlobId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for BlobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BlobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BlobId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_cid(seed: u8) -> String {
        let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
        bytes.extend(std::iter::repeat(seed).take(32));
        ::cid::Cid::try_from(&bytes[..]).unwrap().to_string()
    }

    #[test]
    fn test_valid_cid() {
        let id = raw_cid(7);
        assert!(id.starts_with('b'));
        assert_eq!(BlobId::parse(&id).unwrap().as_str(), id);
    }

    #[test]
    fn test_rejected_ids() {
        assert_eq!(BlobId::parse(""), Err(BlobIdError::Empty));
        assert_eq!(BlobId::parse(&"b".repeat(257)), Err(BlobIdError::TooLong));
        assert!(matches!(
            BlobId::parse("invalid@cid#here!"),
            Err(BlobIdError::Invalid(_))
        ));
        assert_eq!(
            BlobId::parse("QmbWqxBEKC3P8tqsKc98xmWNzrzDtRLMiMPL8wBuTGsMnR"),
            Err(BlobIdError::CidV0NotAllowed)
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let good = serde_json::to_string(&raw_cid(1)).unwrap();
        assert!(serde_json::from_str::<BlobId>(&good).is_ok());
        assert!(serde_json::from_str::<BlobId>("\"not a cid\"").is_err());
    }
}
