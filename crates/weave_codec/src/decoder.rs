//! CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::Value as Cbor;

/// Decode a value from CBOR bytes.
///
/// Tags are stripped and the tagged value is decoded in their place.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or an integer does not
/// fit into an `i64`.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let cbor: Cbor =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_cbor_value(cbor)
}

/// Converts a `ciborium` value into a [`Value`].
pub(crate) fn from_cbor_value(cbor: Cbor) -> CodecResult<Value> {
    Ok(match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(n) => Value::Integer(i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?),
        Cbor::Float(f) => Value::Float(f),
        Cbor::Bytes(b) => Value::Bytes(b),
        Cbor::Text(s) => Value::Text(s),
        Cbor::Tag(_, inner) => from_cbor_value(*inner)?,
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor_value)
                .collect::<CodecResult<_>>()?,
        ),
        Cbor::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((from_cbor_value(k)?, from_cbor_value(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
        other => return Err(CodecError::unsupported_type(format!("{other:?}"))),
    })
}
