//! # WeaveDB Codec
//!
//! Dynamic values and canonical CBOR encoding for WeaveDB.
//!
//! This crate provides:
//! - [`Value`], the dynamic document model stored by the database
//! - deterministic CBOR encoding (identical inputs produce identical bytes)
//! - a serde bridge so typed Rust structs can be stored as documents
//!
//! ## Usage
//!
//! ```
//! use weave_codec::{to_canonical_cbor, from_cbor, Value};
//!
//! let value = Value::Integer(42);
//! let bytes = to_canonical_cbor(&value).unwrap();
//!
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::from_cbor;
pub use encoder::to_canonical_cbor;
pub use error::{CodecError, CodecResult};
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts any serializable type into a [`Value`].
///
/// # Errors
///
/// Returns an error if serialization fails or produces an integer outside
/// the `i64` range.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    let cbor = ciborium::value::Value::serialized(value)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    decoder::from_cbor_value(cbor)
}

/// Converts a [`Value`] into any deserializable type.
///
/// # Errors
///
/// Returns an error if the value does not match the shape of `T`.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    encoder::to_cbor(value)?
        .deserialized()
        .map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
