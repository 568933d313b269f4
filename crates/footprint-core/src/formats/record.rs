//! # Record Format
//!
//! Binary encoding for instance and member records stored by the redb backend.
//!
//! Format: Header (5 bytes) + postcard-serialized record.
//! - 4 bytes: Magic ("FTPR")
//! - 1 byte: Version
//!
//! The header is validated and the size bounded before the payload is
//! handed to postcard.

use crate::{FootprintError, primitives};
use serde::Serialize;
use serde::de::DeserializeOwned;

const HEADER_SIZE: usize = 5;

// =============================================================================
// RECORD HEADER
// =============================================================================

/// The header that precedes every stored record.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl RecordHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), FootprintError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(FootprintError::Deserialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(FootprintError::Deserialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FootprintError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FootprintError::Deserialization(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Serialize a record to bytes (header + payload).
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, FootprintError> {
    let payload =
        postcard::to_stdvec(record).map_err(|e| FootprintError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&RecordHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Deserialize a record, validating size and header first.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FootprintError> {
    if bytes.len() > primitives::MAX_RECORD_SIZE {
        return Err(FootprintError::Deserialization(format!(
            "Record size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            primitives::MAX_RECORD_SIZE
        )));
    }

    let header = RecordHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..])
        .map_err(|e| FootprintError::Deserialization(format!("Failed to decode record: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceId, Member, Role, UserId};
    use chrono::{TimeZone, Utc};

    fn sample_member() -> Member {
        let joined = Utc
            .with_ymd_and_hms(2026, 1, 5, 12, 0, 0)
            .single()
            .expect("valid date");
        Member::new(InstanceId(4), UserId(9), Role::Leader, joined)
    }

    #[test]
    fn header_roundtrip() {
        let header = RecordHeader::new();
        let restored = RecordHeader::from_bytes(&header.to_bytes()).expect("parse header");

        assert_eq!(restored.magic, *primitives::MAGIC_BYTES);
        assert_eq!(restored.version, primitives::FORMAT_VERSION);
    }

    #[test]
    fn member_record_survives_encoding() {
        let member = sample_member();
        let bytes = encode_record(&member).expect("encode");
        assert_eq!(&bytes[0..4], primitives::MAGIC_BYTES);

        let restored: Member = decode_record(&bytes).expect("decode");
        assert_eq!(restored, member);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = encode_record(&sample_member()).expect("encode");
        bytes[0] = b'X';
        let result: Result<Member, _> = decode_record(&bytes);
        assert!(matches!(result, Err(FootprintError::Deserialization(_))));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = encode_record(&sample_member()).expect("encode");
        bytes[4] = primitives::FORMAT_VERSION.saturating_add(1);
        let result: Result<Member, _> = decode_record(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        let result: Result<Member, _> = decode_record(b"FTP");
        assert!(result.is_err());
    }
}
