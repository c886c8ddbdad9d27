//! Challenge/response authentication (§4.7's auth frames).
//!
//! The server sends a random 7-byte challenge; the client must answer with
//! `lowercase_hex(sha1(password || challenge))`. Comparison is constant-time
//! so a timing side channel can't leak how many leading hex characters were
//! correct.

use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use whiplru_core::{AuthChallenge, CHALLENGE_LEN};

/// Generates a fresh random challenge using the OS RNG.
#[must_use]
pub fn generate_challenge() -> AuthChallenge {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::rng().fill_bytes(&mut challenge);
    AuthChallenge { challenge }
}

/// Computes the expected lowercase-hex SHA-1 response for `password` and
/// `challenge`.
#[must_use]
pub fn expected_response_hex(password: &str, challenge: &[u8; CHALLENGE_LEN]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    hex::encode(hasher.finalize())
}

/// Checks a client's claimed response hash against the expected one in
/// constant time.
#[must_use]
pub fn verify_response(password: &str, challenge: &[u8; CHALLENGE_LEN], claimed_hex: &str) -> bool {
    let expected = expected_response_hex(password, challenge);
    if expected.len() != claimed_hex.len() {
        return false;
    }
    expected.as_bytes().ct_eq(claimed_hex.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_verifies() {
        let challenge = [1u8, 2, 3, 4, 5, 6, 7];
        let hex = expected_response_hex("hunter2", &challenge);
        assert!(verify_response("hunter2", &challenge, &hex));
    }

    #[test]
    fn wrong_password_fails() {
        let challenge = [1u8, 2, 3, 4, 5, 6, 7];
        let hex = expected_response_hex("hunter2", &challenge);
        assert!(!verify_response("wrong", &challenge, &hex));
    }

    #[test]
    fn generated_challenges_differ() {
        let a = generate_challenge();
        let b = generate_challenge();
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn response_is_forty_lowercase_hex_chars() {
        let challenge = generate_challenge().challenge;
        let hex = expected_response_hex("x", &challenge);
        assert_eq!(hex.len(), 40);
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }
}
