//! PKCE (RFC 7636) verification, `S256` only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::PkceChallenge;

/// The only supported challenge method.
pub const METHOD_S256: &str = "S256";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

/// Length of a base64url (unpadded) SHA-256 digest.
const CHALLENGE_LEN: usize = 43;

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Length 43–128, charset `[A-Za-z0-9-._~]`.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier.chars().all(is_unreserved)
}

/// Generate a random code verifier (43 chars).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 challenge: `base64url(SHA-256(verifier))`.
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check a verifier against a stored challenge. Malformed verifiers fail
/// without hashing.
pub fn verify(verifier: &str, challenge: &str) -> bool {
    if !is_valid_verifier(verifier) {
        return false;
    }
    let computed = compute_code_challenge(verifier);
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Validate a challenge presented at authorization time.
pub fn parse_challenge(challenge: &str, method: Option<&str>) -> Result<PkceChallenge, String> {
    match method {
        Some(METHOD_S256) => {}
        Some(other) => {
            return Err(format!("unsupported code_challenge_method '{other}'"));
        }
        None => return Err("code_challenge_method is required (S256)".into()),
    }
    if challenge.len() != CHALLENGE_LEN || !challenge.chars().all(is_unreserved) {
        return Err("code_challenge must be a base64url SHA-256 digest".into());
    }
    Ok(PkceChallenge {
        challenge: challenge.to_string(),
        method: METHOD_S256.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B.
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn rfc_vector_matches() {
        assert_eq!(compute_code_challenge(RFC_VERIFIER), RFC_CHALLENGE);
        assert!(verify(RFC_VERIFIER, RFC_CHALLENGE));
    }

    #[test]
    fn generated_verifiers_round_trip() {
        for _ in 0..16 {
            let verifier = generate_code_verifier();
            assert!(is_valid_verifier(&verifier));
            assert!(verify(&verifier, &compute_code_challenge(&verifier)));
        }
    }

    #[test]
    fn boundary_lengths() {
        let min = "a".repeat(MIN_VERIFIER_LEN);
        let max = "~".repeat(MAX_VERIFIER_LEN);
        assert!(verify(&min, &compute_code_challenge(&min)));
        assert!(verify(&max, &compute_code_challenge(&max)));

        let short = "a".repeat(MIN_VERIFIER_LEN - 1);
        let long = "a".repeat(MAX_VERIFIER_LEN + 1);
        assert!(!verify(&short, &compute_code_challenge(&short)));
        assert!(!verify(&long, &compute_code_challenge(&long)));
    }

    #[test]
    fn invalid_charset_fails_closed() {
        let verifier = format!("{}+/", "a".repeat(50));
        assert!(!verify(&verifier, &compute_code_challenge(&verifier)));
    }

    #[test]
    fn mismatched_pair_fails() {
        let other = generate_code_verifier();
        assert!(!verify(RFC_VERIFIER, &compute_code_challenge(&other)));
        assert!(!verify(RFC_VERIFIER, ""));
    }

    #[test]
    fn only_s256_is_accepted() {
        assert!(parse_challenge(RFC_CHALLENGE, Some("S256")).is_ok());
        assert!(parse_challenge(RFC_VERIFIER, Some("plain")).is_err());
        assert!(parse_challenge(RFC_CHALLENGE, None).is_err());
        assert!(parse_challenge("short", Some("S256")).is_err());
    }
}
