//! # Engine Constants
//!
//! Compiled-in defaults. Anything a deployment may want to change is also
//! exposed through [`crate::EngineSettings`] or [`crate::EmissionsFactor`];
//! these values are only the defaults those settings start from.

/// Magic bytes for persisted records.
///
/// - Record Header = Magic Bytes ("FTPR") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"FTPR";

/// Current record format version.
///
/// Increment this when making breaking changes to the record layout.
pub const FORMAT_VERSION: u8 = 1;

/// Regional grid emissions factor in grams CO₂e per kWh (0.475 kg/kWh).
pub const DEFAULT_EMISSIONS_G_PER_KWH: u64 = 475;

/// Default length of one stage window.
pub const DEFAULT_STAGE_DURATION_DAYS: u32 = 14;

/// Default length of the whole chain window.
pub const DEFAULT_CHAIN_DURATION_DAYS: u32 = 90;

/// Attempts made for a transaction that aborts at the store level.
pub const DEFAULT_TXN_ATTEMPTS: u32 = 3;

/// First backoff between transaction attempts; doubles on each retry.
pub const DEFAULT_TXN_BACKOFF_MS: u64 = 10;

/// Extra attempts after losing a `(chain, stage)` slot to another writer.
pub const SLOT_CONFLICT_RETRIES: u32 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Longest single accrual accepted (one week of session time).
pub const MAX_ACCRUAL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Maximum length for organization and project names.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum length for project descriptions.
pub const MAX_DESCRIPTION_LENGTH: usize = 16 * 1024;

/// Maximum number of members supplied when a chain is created.
pub const MAX_INITIAL_MEMBERS: usize = 256;

/// Largest serialized record accepted by the decoder.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emissions_factor_is_regional_grid() {
        // 0.475 kg/kWh
        assert_eq!(DEFAULT_EMISSIONS_G_PER_KWH, 475);
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"FTPR");
    }
}
