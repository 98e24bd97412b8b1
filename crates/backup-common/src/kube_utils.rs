//! Small helpers shared by the synthesizer and the reconciler

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

/// Compute a short deterministic hash of a string.
///
/// Used for the spec-hash annotation on owned resources. The first 8 bytes
/// of the SHA-256 digest are hex-encoded (16 chars).
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()
        .iter()
        .take(8)
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Whether `meta` has a controller owner reference pointing at `owner_uid`
pub fn is_controlled_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.uid == owner_uid && r.controller == Some(true))
        })
}

/// Read an annotation value
pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Whether every field set in `desired` is present with the same value in
/// `observed`.
///
/// Fields only `observed` carries (server-side defaults) are ignored. Arrays
/// must have the same length and match element by element, so an added or
/// removed container counts as a difference.
pub fn covers(observed: &Value, desired: &Value) -> bool {
    match (observed, desired) {
        (_, Value::Null) => true,
        (Value::Object(observed), Value::Object(desired)) => desired
            .iter()
            .all(|(key, want)| match observed.get(key) {
                Some(have) => covers(have, want),
                None => want.is_null(),
            }),
        (Value::Array(observed), Value::Array(desired)) => {
            observed.len() == desired.len()
                && observed.iter().zip(desired).all(|(have, want)| covers(have, want))
        }
        (observed, desired) => observed == desired,
    }
}
