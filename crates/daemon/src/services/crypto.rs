//! Credential encryption at rest.
//!
//! Provider api keys are sealed with AES-256-GCM under a key derived via
//! PBKDF2-HMAC-SHA256 from a host-stable identifier and a fixed
//! versioned salt. Ciphertext layout: `IV(16) || TAG(16) || CT`,
//! base64-encoded.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;

use cd_domain::{Error, Result};

type CredCipher = AesGcm<Aes256, U16>;

const SALT: &[u8] = b"ai-consultation-mcp.credentials.v1";
const PBKDF2_ROUNDS: u32 = 100_000;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// First non-empty of USER / USERNAME / HOME. Stable across restarts on
/// the same host account, which is all the at-rest scheme needs.
fn host_identifier() -> String {
    for var in ["USER", "USERNAME", "HOME"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    "consultd".to_owned()
}

fn derive_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(host_identifier().as_bytes(), SALT, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt a plaintext api key for storage.
pub fn encrypt_key(plaintext: &str) -> Result<String> {
    let cipher = CredCipher::new_from_slice(&derive_key())
        .map_err(|e| Error::Internal(format!("cipher init: {e}")))?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|e| Error::Internal(format!("encrypt: {e}")))?;

    // AEAD output is CT || TAG; the stored layout is IV || TAG || CT.
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ct);
    Ok(BASE64.encode(out))
}

/// Decrypt a stored api key. Any corruption or key mismatch is an error;
/// callers must never surface the raw ciphertext instead.
pub fn decrypt_key(encoded: &str) -> Result<String> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| Error::Internal(format!("credential decode: {e}")))?;
    if raw.len() < IV_LEN + TAG_LEN {
        return Err(Error::Internal("credential ciphertext too short".into()));
    }
    let (iv, rest) = raw.split_at(IV_LEN);
    let (tag, ct) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(ct.len() + TAG_LEN);
    sealed.extend_from_slice(ct);
    sealed.extend_from_slice(tag);

    let cipher = CredCipher::new_from_slice(&derive_key())
        .map_err(|e| Error::Internal(format!("cipher init: {e}")))?;
    let plain = cipher
        .decrypt(Nonce::from_slice(iv), sealed.as_slice())
        .map_err(|_| Error::Internal("credential decrypt failed".into()))?;

    String::from_utf8(plain).map_err(|_| Error::Internal("credential is not UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_exact_bytes() {
        let key = "sk-deepseek-0123456789abcdef";
        let sealed = encrypt_key(key).unwrap();
        assert_ne!(sealed, key);
        assert_eq!(decrypt_key(&sealed).unwrap(), key);
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let a = encrypt_key("same-key").unwrap();
        let b = encrypt_key("same-key").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt_key(&a).unwrap(), decrypt_key(&b).unwrap());
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let sealed = encrypt_key("secret").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);
        assert!(decrypt_key(&tampered).is_err());
    }

    #[test]
    fn junk_input_is_an_error_not_a_panic() {
        assert!(decrypt_key("not base64!!").is_err());
        assert!(decrypt_key("AAAA").is_err());
        assert!(decrypt_key("").is_err());
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let sealed = encrypt_key("").unwrap();
        assert_eq!(decrypt_key(&sealed).unwrap(), "");
    }
}
