//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding or validating
/// protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("could not encode: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed input, missing fields or a
    /// payload of the wrong shape.
    #[cfg(feature = "json")]
    #[error("could not decode: {0}")]
    Decode(serde_json::Error),

    /// The value decoded but breaks a protocol rule, e.g. a session
    /// code with the wrong length.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
