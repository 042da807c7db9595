use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERSION: &str = "v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM cipher for OAuth token blobs stored at rest.
///
/// Wire format: `v1.<iv>.<tag>.<ciphertext>` with base64url (no padding)
/// segments. The tag is carried separately so a stored blob is
/// self-describing and tampering with any segment fails decryption.
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    /// Build a cipher from configured key material: either a base64url
    /// encoding of exactly 32 bytes, or an arbitrary passphrase that is
    /// stretched through SHA-256.
    pub fn from_key_material(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("token encryption key is empty"));
        }
        let key = match URL_SAFE_NO_PAD.decode(trimmed) {
            Ok(decoded) if decoded.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&decoded);
                key
            }
            _ => Sha256::digest(trimmed.as_bytes()).into(),
        };
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut iv = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| anyhow!("cipher init failed: {err}"))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| anyhow!("token encryption failed"))?;
        // aes-gcm appends the tag to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok([
            VERSION,
            &URL_SAFE_NO_PAD.encode(iv),
            &URL_SAFE_NO_PAD.encode(tag),
            &URL_SAFE_NO_PAD.encode(ciphertext),
        ]
        .join("."))
    }

    pub fn decrypt(&self, token: &str) -> Result<String> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 4 || parts[0] != VERSION {
            return Err(anyhow!("invalid encrypted token format"));
        }

        let iv = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| anyhow!("invalid encrypted token iv"))?;
        let tag = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| anyhow!("invalid encrypted token tag"))?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(parts[3])
            .map_err(|_| anyhow!("invalid encrypted token body"))?;
        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(anyhow!("invalid encrypted token format"));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| anyhow!("cipher init failed: {err}"))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| anyhow!("token decryption failed"))?;

        String::from_utf8(plaintext).map_err(|_| anyhow!("decrypted token is not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_exact() {
        let cipher = TokenCipher::from_key_material("some passphrase key").unwrap();
        let payload = r#"{"accessToken":"abc","refreshToken":"xyz"}"#;
        let sealed = cipher.encrypt(payload).unwrap();
        assert!(sealed.starts_with("v1."));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn test_tamper_detection() {
        let cipher = TokenCipher::from_key_material("some passphrase key").unwrap();
        let sealed = cipher.encrypt("payload").unwrap();
        // Flip one character of the ciphertext segment.
        let mut parts: Vec<String> = sealed.split('.').map(str::to_string).collect();
        let body = parts[3].clone();
        let flipped = if body.starts_with('A') { "B" } else { "A" };
        parts[3] = format!("{flipped}{}", &body[1..]);
        assert!(cipher.decrypt(&parts.join(".")).is_err());
    }

    #[test]
    fn test_rejects_bad_format() {
        let cipher = TokenCipher::from_key_material("key").unwrap();
        assert!(cipher.decrypt("v2.a.b.c").is_err());
        assert!(cipher.decrypt("v1.a.b").is_err());
        assert!(cipher.decrypt("plaintext-token").is_err());
    }

    #[test]
    fn test_base64_key_material() {
        let raw = [7u8; 32];
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        let cipher = TokenCipher::from_key_material(&encoded).unwrap();
        let sealed = cipher.encrypt("x").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "x");
    }
}
