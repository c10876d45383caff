//! Run-task callback signature verification.
//!
//! The platform signs each callback body with HMAC-SHA512 keyed by the HMAC
//! key configured on the run task. The lowercase hex digest arrives in the
//! [`SIGNATURE_HEADER`] header.

use hmac::{Hmac, Mac};
use sha2::Sha512;

/// Header carrying the hex-encoded HMAC of the raw request body.
pub const SIGNATURE_HEADER: &str = "X-Tfc-Task-Signature";

type HmacSha512 = Hmac<Sha512>;

/// Returns `true` only if `signature` is the hex HMAC-SHA512 of `raw_body`
/// under `secret`.
///
/// A missing header, a non-hex header, or an empty secret all return `false`.
/// The digest comparison is constant-time.
pub fn verify(raw_body: &[u8], signature: Option<&str>, secret: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

/// Computes the hex signature the platform would send for `raw_body`.
///
/// Used by tests and local tooling to produce signed requests.
pub fn sign(raw_body: &[u8], secret: &[u8]) -> String {
    // HMAC accepts keys of any length, including empty.
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SECRET: &[u8] = b"run-task-hmac-key";

    #[test]
    fn correct_signature_verifies() {
        let body = br#"{"run_id":"run-abc123"}"#;
        let signature = sign(body, SECRET);
        assert_eq!(signature.len(), 128);
        assert!(verify(body, Some(&signature), SECRET));
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let body = b"{}";
        let signature = sign(body, SECRET).to_uppercase();
        assert!(verify(body, Some(&signature), SECRET));
    }

    #[test]
    fn missing_or_garbage_inputs_are_rejected() {
        let body = b"{}";
        let signature = sign(body, SECRET);
        assert!(!verify(body, None, SECRET));
        assert!(!verify(body, Some(""), SECRET));
        assert!(!verify(body, Some("not-hex-at-all"), SECRET));
        assert!(!verify(body, Some("abc"), SECRET));
        assert!(!verify(body, Some(&signature), b""));
        assert!(!verify(body, Some(&signature), b"other-key"));
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let body = b"{}";
        let signature = sign(body, SECRET);
        assert!(!verify(body, Some(&signature[..64]), SECRET));
    }

    proptest! {
        #[test]
        fn any_body_mutation_fails_verification(
            body in prop::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let signature = sign(&body, SECRET);
            prop_assert!(verify(&body, Some(&signature), SECRET));

            let mut mutated = body.clone();
            let i = index.index(mutated.len());
            mutated[i] ^= flip;
            prop_assert!(!verify(&mutated, Some(&signature), SECRET));
        }

        #[test]
        fn any_signature_mutation_fails_verification(
            body in prop::collection::vec(any::<u8>(), 0..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let signature = sign(&body, SECRET);
            let mut mutated = signature.clone().into_bytes();
            let i = index.index(mutated.len());
            mutated[i] ^= flip;
            let mutated = String::from_utf8_lossy(&mutated).into_owned();
            prop_assume!(!mutated.eq_ignore_ascii_case(&signature));
            prop_assert!(!verify(&body, Some(&mutated), SECRET));
        }
    }
}
