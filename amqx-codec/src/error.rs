//! Codec error types.
//!
//! The decoder distinguishes two failure families: input that is merely
//! truncated ([`CodecError::Incomplete`] — buffer more bytes and retry) and
//! input that can never decode ([`CodecError::Malformed`] and friends —
//! fatal, the byte stream cannot be trusted past this point).

use thiserror::Error;

/// Unified error type for encoding and decoding AMQP data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ends mid-value. Not a protocol error: the caller must
    /// supply at least `needed` further bytes and retry.
    #[error("incomplete data: {needed} more bytes needed")]
    Incomplete { needed: usize },

    /// The input claims to be complete but cannot be decoded.
    #[error("malformed data: {0}")]
    Malformed(&'static str),

    /// A constructor byte outside the AMQP 1.0 type table.
    #[error("invalid constructor byte 0x{0:02x}")]
    InvalidConstructor(u8),

    /// A composite type was decoded without a field its definition marks
    /// mandatory.
    #[error("{performative} is missing mandatory field '{field}'")]
    MandatoryField {
        performative: &'static str,
        field: &'static str,
    },

    /// A composite field decoded to an unexpected AMQP type.
    #[error("{performative} field '{field}' has unexpected type")]
    FieldType {
        performative: &'static str,
        field: &'static str,
    },

    /// A described value was required to be a known composite but the
    /// descriptor code is not recognized.
    #[error("unknown descriptor code 0x{0:02x}")]
    UnknownDescriptor(u64),

    /// The value exceeds the maximum width representable on the wire.
    #[error("value too large to encode: {0}")]
    EncodeOverflow(&'static str),

    /// Frame-level framing violation (size below the 8-byte header or
    /// above the negotiated maximum).
    #[error("framing error: {0}")]
    Framing(&'static str),
}

impl CodecError {
    /// True when the error means "feed me more bytes", not "give up".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}
