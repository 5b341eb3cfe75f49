//! Canonical JSON encoding and the manifest self-hash protocol.
//!
//! Every hash in this crate (dataset fingerprints, per-file manifest hashes,
//! plan ids, export manifests) is computed over the byte output of
//! [`to_canonical_bytes`]. The encoding is deterministic: object keys sorted
//! lexicographically (free, since `serde_json`'s `Map` is a `BTreeMap` unless
//! the `preserve_order` feature is enabled, which this crate never enables),
//! minimal separators (`serde_json`'s compact formatter already emits none),
//! NFC-normalized strings, and floats quantized to 12 decimal places before
//! encoding so that two numerically-equal-but-differently-rounded floats never
//! diverge in hash.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Decimal places floats are quantized to before canonical encoding.
pub const FLOAT_QUANTIZE_DECIMALS: i32 = 12;

/// Round `x` to [`FLOAT_QUANTIZE_DECIMALS`] decimal places.
pub fn quantize(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let scale = 10f64.powi(FLOAT_QUANTIZE_DECIMALS);
    (x * scale).round() / scale
}

/// Recursively normalize a JSON value into canonical form: sorted keys (already
/// implied by `Map`'s `BTreeMap` backing), NFC-normalized strings, and
/// quantized floats.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let key: String = k.nfc().collect();
                out.insert(key, canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.nfc().collect()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_i64() || n.is_u64() {
                    Value::Number(n.clone())
                } else {
                    let q = quantize(f);
                    Number::from_f64(q).map(Value::Number).unwrap_or(Value::Null)
                }
            } else {
                Value::Number(n.clone())
            }
        }
        other => other.clone(),
    }
}

/// Canonicalize `value` and encode it as the deterministic byte form used for
/// all hashing in this crate.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let canon = canonicalize(value);
    // `serde_json`'s compact formatter (the default) emits minimal separators:
    // no spaces after `:` or `,`. Combined with `Map`'s sorted-key backing,
    // this is already the canonical form.
    serde_json::to_vec(&canon).expect("canonical value must serialize")
}

/// Canonicalize and hash a serializable value in one step.
pub fn canonical_sha256_of<T: Serialize>(value: &T) -> CoreResult<String> {
    let v = serde_json::to_value(value)?;
    Ok(sha256_hex(&to_canonical_bytes(&v)))
}

/// SHA-256 hex digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stamp `value` (a JSON object) with its own self-hash under `field_name`.
///
/// The hash is computed over the canonical bytes of `value` with `field_name`
/// removed, then inserted back under that key. Calling this twice is
/// idempotent: the second call removes the previously-stamped hash before
/// recomputing, producing the same result.
pub fn stamp_self_hash(value: &mut Value, field_name: &str) -> CoreResult<String> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| CoreError::ContractViolation("self-hash target must be a JSON object".into()))?;
    obj.remove(field_name);
    let hash = sha256_hex(&to_canonical_bytes(&Value::Object(obj.clone())));
    obj.insert(field_name.to_string(), Value::String(hash.clone()));
    Ok(hash)
}

/// Verify that `value`'s `field_name` equals the self-hash of the rest of the object.
pub fn verify_self_hash(value: &Value, field_name: &str) -> CoreResult<bool> {
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::ContractViolation("self-hash target must be a JSON object".into()))?;
    let declared = match obj.get(field_name).and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => return Ok(false),
    };
    let mut without = obj.clone();
    without.remove(field_name);
    let recomputed = sha256_hex(&to_canonical_bytes(&Value::Object(without)));
    Ok(declared == recomputed)
}
