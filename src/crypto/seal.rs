//! XChaCha20-Poly1305 sealing of local payloads.
//!
//! Every user gets its own key, derived from a device secret with
//! HKDF-SHA256 (salt = user id). The user id is also bound as AAD so a
//! ciphertext moved to another account fails to open.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, SEAL_KEY_INFO, SEAL_KEY_SIZE};

/// Device-wide secret from which per-user keys are derived.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceSecret([u8; SEAL_KEY_SIZE]);

impl DeviceSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEAL_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key material.
    pub fn from_bytes(bytes: [u8; SEAL_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceSecret(..)")
    }
}

/// A per-user sealing key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SealingKey([u8; SEAL_KEY_SIZE]);

/// Output of [`PayloadCipher::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Random 24-byte nonce.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// Ciphertext with appended Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

/// Seals and opens payloads for the local store.
#[derive(Debug, Clone)]
pub struct PayloadCipher {
    secret: DeviceSecret,
}

impl PayloadCipher {
    /// Create a cipher over a device secret.
    pub fn new(secret: DeviceSecret) -> Self {
        Self { secret }
    }

    fn derive_key(&self, user_id: &str) -> Result<SealingKey, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(user_id.as_bytes()), &self.secret.0);
        let mut key = [0u8; SEAL_KEY_SIZE];
        hk.expand(SEAL_KEY_INFO, &mut key)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(SealingKey(key))
    }

    /// Encrypt `plaintext` for `user_id` under a fresh random nonce.
    pub fn seal(&self, user_id: &str, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let key = self.derive_key(user_id)?;
        let cipher = XChaCha20Poly1305::new((&key.0).into());

        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(Sealed { nonce, ciphertext })
    }

    /// Decrypt a payload sealed for `user_id`.
    pub fn open(
        &self,
        user_id: &str,
        nonce: &[u8; AEAD_NONCE_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let key = self.derive_key(user_id)?;
        let cipher = XChaCha20Poly1305::new((&key.0).into());

        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PayloadCipher {
        PayloadCipher::new(DeviceSecret::from_bytes([7u8; SEAL_KEY_SIZE]))
    }

    #[test]
    fn test_seal_open() {
        let cipher = cipher();
        let sealed = cipher.seal("u1", b"progress").unwrap();

        assert_eq!(sealed.ciphertext.len(), b"progress".len() + AEAD_TAG_SIZE);
        assert_ne!(&sealed.ciphertext[..8], b"progress");

        let opened = cipher.open("u1", &sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(opened, b"progress");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = cipher();
        let a = cipher.seal("u1", b"same").unwrap();
        let b = cipher.seal("u1", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_open_wrong_user_fails() {
        let cipher = cipher();
        let sealed = cipher.seal("u1", b"progress").unwrap();
        let result = cipher.open("u2", &sealed.nonce, &sealed.ciphertext);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_open_tampered_fails() {
        let cipher = cipher();
        let mut sealed = cipher.seal("u1", b"progress").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(cipher.open("u1", &sealed.nonce, &sealed.ciphertext).is_err());
    }

    #[test]
    fn test_open_truncated_fails() {
        let cipher = cipher();
        let result = cipher.open("u1", &[0u8; AEAD_NONCE_SIZE], &[1, 2, 3]);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_debug_hides_secret() {
        let secret = DeviceSecret::from_bytes([9u8; SEAL_KEY_SIZE]);
        assert_eq!(format!("{secret:?}"), "DeviceSecret(..)");
    }
}
