use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hash the claim secret together with a deployment pepper.
///
/// Produces an Argon2id PHC string with a fresh random salt. The pepper is
/// concatenated into the password material so a leaked database row alone
/// is not enough to brute-force the code offline.
pub fn hash_secret(secret: &str, pepper: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let material = peppered(secret, pepper);
    let hash = Argon2::default()
        .hash_password(material.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("claim code hash failed: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a supplied secret against a stored hash. Verification is
/// constant-time; malformed stored hashes verify false rather than erroring.
pub fn verify_secret(secret: &str, pepper: &str, encoded: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded) else {
        return false;
    };
    let material = peppered(secret, pepper);
    Argon2::default()
        .verify_password(material.as_bytes(), &parsed)
        .is_ok()
}

fn peppered(secret: &str, pepper: &str) -> String {
    format!("{secret}{pepper}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let encoded = hash_secret("super-secret-code", "pepper-123").unwrap();
        assert!(verify_secret("super-secret-code", "pepper-123", &encoded));
        assert!(!verify_secret("wrong-code", "pepper-123", &encoded));
        assert!(!verify_secret("super-secret-code", "other-pepper", &encoded));
    }

    #[test]
    fn test_malformed_hash_verifies_false() {
        assert!(!verify_secret("code", "pepper", ""));
        assert!(!verify_secret("code", "pepper", "not-a-phc-string"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let one = hash_secret("code", "pepper").unwrap();
        let two = hash_secret("code", "pepper").unwrap();
        assert_ne!(one, two);
    }
}
