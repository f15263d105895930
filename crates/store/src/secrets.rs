//! Sealing for integration secrets at rest.
//!
//! Wire format: `v1:<iv_b64>:<tag_b64>:<ciphertext_b64>` — AES-256-GCM
//! with a fresh 12-byte nonce per seal. The GCM tag is carried
//! separately so the format is self-describing.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use vx_domain::{Error, Result};

const VERSION: &str = "v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM box for integration secrets.
#[derive(Clone)]
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    /// Build from the configured 64-hex-char key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex)
            .map_err(|e| Error::Crypto(format!("secret key is not hex: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("secret key must be 32 bytes".into()))?;
        Ok(Self { key })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, Payload::from(plaintext.as_bytes()))
            .map_err(|_| Error::Crypto("AES-GCM seal failed".into()))?;

        // aes-gcm appends the tag to the ciphertext; split it back out.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{VERSION}:{}:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let mut parts = sealed.split(':');
        let (version, iv_b64, tag_b64, ct_b64) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(v), Some(iv), Some(tag), Some(ct), None) => (v, iv, tag, ct),
            _ => return Err(Error::Crypto("malformed sealed secret".into())),
        };
        if version != VERSION {
            return Err(Error::Crypto(format!(
                "unsupported sealed-secret version '{version}'"
            )));
        }

        let decode = |label: &str, b64: &str| {
            BASE64
                .decode(b64)
                .map_err(|e| Error::Crypto(format!("sealed secret {label} is not base64: {e}")))
        };
        let nonce_bytes = decode("iv", iv_b64)?;
        let tag = decode("tag", tag_b64)?;
        let mut ciphertext = decode("ciphertext", ct_b64)?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(Error::Crypto("sealed secret iv must be 12 bytes".into()));
        }
        if tag.len() != TAG_LEN {
            return Err(Error::Crypto("sealed secret tag must be 16 bytes".into()));
        }

        ciphertext.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| Error::Crypto("sealed secret failed authentication".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("sealed secret is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn seal_open_round_trip() {
        let sbox = SecretBox::from_hex_key(KEY).unwrap();
        let sealed = sbox.seal("sk-live-abc123").unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_eq!(sealed.split(':').count(), 4);
        assert_eq!(sbox.open(&sealed).unwrap(), "sk-live-abc123");
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let sbox = SecretBox::from_hex_key(KEY).unwrap();
        let a = sbox.seal("same").unwrap();
        let b = sbox.seal("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let sbox = SecretBox::from_hex_key(KEY).unwrap();
        let sealed = sbox.seal("secret").unwrap();
        let mut parts: Vec<&str> = sealed.split(':').collect();
        let flipped = BASE64.encode(b"xxxxxxxx");
        parts[3] = &flipped;
        let tampered = parts.join(":");
        assert!(sbox.open(&tampered).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let sbox = SecretBox::from_hex_key(KEY).unwrap();
        let other = SecretBox::from_hex_key(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        let sealed = sbox.seal("secret").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn rejects_malformed_and_wrong_version() {
        let sbox = SecretBox::from_hex_key(KEY).unwrap();
        assert!(sbox.open("v1:only:three").is_err());
        assert!(sbox.open("v2:a:b:c").is_err());
        assert!(SecretBox::from_hex_key("short").is_err());
    }
}
