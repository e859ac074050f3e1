//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};

/// Encode a value to canonical CBOR bytes.
///
/// Output is deterministic:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers and floats use the shortest lossless encoding
/// - No indefinite-length encoding
///
/// # Errors
///
/// Returns an error if the value contains a NaN float.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let cbor = to_cbor(value)?;
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Converts a [`Value`] into the `ciborium` data model, sorting map keys.
pub(crate) fn to_cbor(value: &Value) -> CodecResult<Cbor> {
    Ok(match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => Cbor::Integer(Integer::from(*n)),
        Value::Float(f) if f.is_nan() => return Err(CodecError::NaNForbidden),
        Value::Float(f) => Cbor::Float(*f),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Array(items) => Cbor::Array(items.iter().map(to_cbor).collect::<CodecResult<_>>()?),
        Value::Map(pairs) => {
            let mut encoded = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key_bytes = to_canonical_cbor(key)?;
                encoded.push((key_bytes, to_cbor(key)?, to_cbor(value)?));
            }
            encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
            Cbor::Map(encoded.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
    })
}
