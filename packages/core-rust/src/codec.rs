//! `MsgPack` key/value codec shared by persistent engines.
//!
//! Engines store raw bytes; [`MsgPackCodec`] turns any `serde` type into
//! those bytes with `rmp_serde::to_vec_named()`, so struct fields are keyed
//! by name and survive field reordering between releases.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Failure to encode or decode a stored key or value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Stateless `MsgPack` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encodes `value` to `MsgPack` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value's `Serialize` impl fails.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decodes `MsgPack` bytes into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are truncated, corrupt,
    /// or do not match the shape of `T`.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
