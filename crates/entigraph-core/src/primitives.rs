//! # Engine Primitives
//!
//! Fixed constants of the entigraph engine.
//!
//! These are compiled into the binary and immutable at runtime. Anything a
//! caller may want to change per graph lives in [`crate::GraphConfig`].

/// Schema assigned to placeholder records created for unresolved references.
///
/// Placeholders only need to be compatible with every real type they might
/// later be filled with, so they use the root of the type hierarchy.
pub const STUB_SCHEMA: &str = "Thing";

/// Number of digest bytes kept in a merged canonical id (hex length 32).
pub const CANONICAL_ID_BYTES: usize = 16;

/// Separator between sorted part ids when deriving a canonical id.
///
/// Record ids are validated to never contain it.
pub const CANONICAL_ID_SEPARATOR: char = '\0';

/// Magic bytes for the entigraph binary snapshot header.
///
/// - File Header = Magic Bytes ("EGRF") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"EGRF";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a record id.
pub const MAX_ID_LENGTH: usize = 1024;

/// Maximum length of a schema name.
pub const MAX_SCHEMA_LENGTH: usize = 128;

/// Maximum length of a property name.
///
/// Property names longer than this will be rejected by the Ingestor.
pub const MAX_PROPERTY_LENGTH: usize = 256;

/// Maximum length for value strings.
///
/// Values longer than this (64KB) will be rejected by the Ingestor.
/// This prevents memory exhaustion from malicious or malformed input.
pub const MAX_VALUE_LENGTH: usize = 65536;

/// Maximum number of values a single record may carry across all properties.
pub const MAX_VALUES_PER_RECORD: usize = 10000;

/// Maximum serialized snapshot size accepted by the decoder (512 MiB).
pub const MAX_SNAPSHOT_BYTES: usize = 512 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"EGRF");
    }

    #[test]
    fn canonical_id_is_128_bits() {
        assert_eq!(CANONICAL_ID_BYTES * 8, 128);
    }
}
