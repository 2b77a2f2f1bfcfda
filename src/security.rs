//! Password hashing and random token primitives shared by the credential store,
//! the session layer and the CSRF guard.

use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use password_hash::{SaltString, PasswordHash};
use subtle::ConstantTimeEq;

/// Hash a plaintext password into an Argon2 PHC string with a fresh random salt.
/// Two calls with the same input never produce the same output.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

/// Verify a plaintext password against a stored PHC string.
/// A malformed stored hash verifies as false.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// `len` random bytes rendered as lowercase hex (`2 * len` chars).
pub fn random_hex(len: usize) -> Result<String> {
    use std::fmt::Write as _;
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow!(e.to_string()))?;
    let mut out = String::with_capacity(len * 2);
    for b in &bytes { let _ = write!(&mut out, "{:02x}", b); }
    Ok(out)
}

/// 256-bit random identifier, base64url without padding.
pub fn random_id() -> Result<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Constant-time string equality. Length mismatch returns false.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_hashes_differently_and_both_verify() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&a, "secret1"));
        assert!(verify_password(&b, "secret1"));
        assert!(!verify_password(&a, "secret1x"));
    }

    #[test]
    fn hash_is_not_the_plaintext() {
        let h = hash_password("hunter22").unwrap();
        assert!(!h.contains("hunter22"));
        assert!(h.starts_with("$argon2"));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn random_hex_has_expected_length_and_alphabet() {
        let t = random_hex(32).unwrap();
        assert_eq!(t.len(), 64);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, random_hex(32).unwrap());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
