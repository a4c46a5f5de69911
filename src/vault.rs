// 🔐 Token Vault - Provider access tokens are sealed before they are stored
//
// Sealed form: "v1.<nonce>.<ciphertext+tag>" (base64), AES-256-GCM with a
// fresh 96-bit nonce per seal. Plaintext only exists inside the provider
// client, for the duration of one request.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;

const FORMAT_VERSION: &str = "v1";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Access token as persisted in `linked_accounts.access_token`
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SealedToken(String);

impl SealedToken {
    /// Wrap a value read back from storage
    pub(crate) fn from_stored(value: String) -> Self {
        SealedToken(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedToken(..)")
    }
}

#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key: &Key<Aes256Gcm> = key.into();
        TokenCipher {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Key as configured: 32 bytes, base64
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("Token key is not valid base64")?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| anyhow!("Token key must be {} bytes, got {}", KEY_LEN, bytes.len()))?;
        Ok(TokenCipher::new(&key))
    }

    /// Fresh random key, base64-encoded for config files
    pub fn generate_key() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedToken> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("Failed to seal access token"))?;

        Ok(SealedToken(format!(
            "{}.{}.{}",
            FORMAT_VERSION,
            STANDARD.encode(nonce),
            STANDARD.encode(ciphertext)
        )))
    }

    pub fn open(&self, sealed: &SealedToken) -> Result<String> {
        let mut parts = sealed.as_str().splitn(3, '.');
        if parts.next() != Some(FORMAT_VERSION) {
            bail!("Access token is not in sealed form");
        }
        let (Some(nonce), Some(ciphertext)) = (parts.next(), parts.next()) else {
            bail!("Malformed sealed access token");
        };

        let nonce = STANDARD.decode(nonce).context("Malformed sealed token nonce")?;
        if nonce.len() != NONCE_LEN {
            bail!("Malformed sealed token nonce");
        }
        let ciphertext = STANDARD
            .decode(ciphertext)
            .context("Malformed sealed token ciphertext")?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| anyhow!("Access token could not be opened with the configured key"))?;
        String::from_utf8(plaintext).context("Access token is not valid UTF-8")
    }
}

#[cfg(test)]
pub(crate) fn test_cipher() -> TokenCipher {
    TokenCipher::new(&[7u8; KEY_LEN])
}

/// Seal with the fixed test key
#[cfg(test)]
pub(crate) fn sealed(plaintext: &str) -> SealedToken {
    test_cipher().seal(plaintext).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_hides_plaintext_and_opens_back() {
        let cipher = test_cipher();
        let sealed = cipher.seal("access-sandbox-123").unwrap();

        assert!(sealed.as_str().starts_with("v1."));
        assert!(!sealed.as_str().contains("access-sandbox-123"));
        assert_eq!(cipher.open(&sealed).unwrap(), "access-sandbox-123");
    }

    #[test]
    fn test_same_token_seals_differently() {
        let cipher = test_cipher();
        let a = cipher.seal("token").unwrap();
        let b = cipher.seal("token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_or_tampering_fails() {
        let sealed = test_cipher().seal("token").unwrap();

        let other = TokenCipher::new(&[9u8; KEY_LEN]);
        assert!(other.open(&sealed).is_err());

        let mut tampered = sealed.as_str().to_string();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(test_cipher()
            .open(&SealedToken::from_stored(tampered))
            .is_err());

        assert!(test_cipher()
            .open(&SealedToken::from_stored("access-sandbox-plain".into()))
            .is_err());
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = TokenCipher::generate_key();
        let cipher = TokenCipher::from_base64(&encoded).unwrap();
        let sealed = cipher.seal("token").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "token");

        assert!(TokenCipher::from_base64("c2hvcnQ=").is_err());
        assert!(TokenCipher::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let sealed = test_cipher().seal("token").unwrap();
        assert_eq!(format!("{:?}", sealed), "SealedToken(..)");
    }
}
