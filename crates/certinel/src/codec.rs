//! Self-describing binary value codec
//!
//! Settings and challenge values are MessagePack with map field names
//! (`to_vec_named`), so records written by one process version decode on
//! another even when optional fields are added. Nulls, booleans, integers,
//! floats, UTF-8 strings, byte strings, arrays, and nested maps all
//! round-trip.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::CertsResult;

/// Encode a value as named-map MessagePack
pub fn encode<T: Serialize>(value: &T) -> CertsResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a named-map MessagePack value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CertsResult<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
