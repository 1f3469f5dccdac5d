//! At-rest protection for the custodial signing key.
//!
//! Two formats live here:
//! - `encrypt`/`decrypt` read and write `ADMIN_PRIVATE_KEY_SOLANA`. This is
//!   AES-128-CBC with PKCS7 padding, base64 encoded. The key is the first 16
//!   bytes of SHA-512(`SECRET_KEY`). The IV is the first 8 bytes of
//!   SHA-512(`SECRET_IV`) followed by 8 zero bytes, which is what existing
//!   ciphertexts were produced with.
//! - `seal`/`unseal` protect the secret column of queued jobs with
//!   AES-256-GCM under a fresh random nonce per value, stored as
//!   base64(nonce || ciphertext).

use aes::Aes128;
use aes_gcm::aead::Aead;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};

use crate::domain::{AppError, ConfigError};

type CbcEncryptor = cbc::Encryptor<Aes128>;
type CbcDecryptor = cbc::Decryptor<Aes128>;

const NONCE_LEN: usize = 12;

pub struct KeyVault {
    cbc_key: [u8; 16],
    cbc_iv: [u8; 16],
    sealer: Aes256Gcm,
}

impl KeyVault {
    #[must_use]
    pub fn new(secret_key: &SecretString, secret_iv: &SecretString) -> Self {
        let key_digest = Sha512::digest(secret_key.expose_secret().as_bytes());
        let iv_digest = Sha512::digest(secret_iv.expose_secret().as_bytes());

        let mut cbc_key = [0u8; 16];
        cbc_key.copy_from_slice(&key_digest[..16]);
        let mut cbc_iv = [0u8; 16];
        cbc_iv[..8].copy_from_slice(&iv_digest[..8]);

        let sealer = Aes256Gcm::new(GenericArray::from_slice(&key_digest[32..64]));

        Self {
            cbc_key,
            cbc_iv,
            sealer,
        }
    }

    /// Encrypt in the `ADMIN_PRIVATE_KEY_SOLANA` format
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let ciphertext = CbcEncryptor::new_from_slices(&self.cbc_key, &self.cbc_iv)
            .map_err(|e| vault_error(format!("cipher setup failed: {}", e)))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypt a value produced by [`KeyVault::encrypt`]
    pub fn decrypt(&self, ciphertext: &str) -> Result<SecretString, AppError> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| vault_error(format!("ciphertext is not base64: {}", e)))?;
        let opened = CbcDecryptor::new_from_slices(&self.cbc_key, &self.cbc_iv)
            .map_err(|e| vault_error(format!("cipher setup failed: {}", e)))?
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| vault_error("ciphertext rejected (wrong SECRET_KEY or SECRET_IV?)"))?;
        let plaintext = String::from_utf8(opened)
            .map_err(|_| vault_error("decrypted secret is not valid UTF-8"))?;
        Ok(SecretString::from(plaintext))
    }

    /// Authenticated encryption under a random nonce
    pub fn seal(&self, plaintext: &str) -> Result<String, AppError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .sealer
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| vault_error(format!("sealing failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn unseal(&self, stored: &str) -> Result<SecretString, AppError> {
        let bytes = STANDARD
            .decode(stored.trim())
            .map_err(|e| vault_error(format!("sealed value is not base64: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(vault_error("sealed value is truncated"));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let opened = self
            .sealer
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| vault_error("sealed value rejected"))?;
        let plaintext = String::from_utf8(opened)
            .map_err(|_| vault_error("unsealed secret is not valid UTF-8"))?;
        Ok(SecretString::from(plaintext))
    }
}

fn vault_error(message: impl Into<String>) -> AppError {
    AppError::Config(ConfigError::Vault(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(key: &str, iv: &str) -> KeyVault {
        KeyVault::new(&SecretString::from(key), &SecretString::from(iv))
    }

    #[test]
    fn test_decrypts_existing_ciphertexts() {
        let v = vault("relayer-secret-key", "relayer-secret-iv");
        assert_eq!(
            v.decrypt("GZdTiPF6ih9C1r8lONFDjQ==").unwrap().expose_secret(),
            "[12,34,56,78]"
        );
        assert_eq!(
            v.decrypt("TIspZP6SPPSnhIyE06Draw==").unwrap().expose_secret(),
            "custodial-key"
        );
    }

    #[test]
    fn test_encrypt_matches_existing_format() {
        let v = vault("relayer-secret-key", "relayer-secret-iv");
        assert_eq!(v.encrypt("custodial-key").unwrap(), "TIspZP6SPPSnhIyE06Draw==");
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = vault("key", "iv").encrypt("a much longer secret value").unwrap();
        let result = vault("other", "iv").decrypt(&sealed);
        // Wrong keys almost always break the padding; when they do not, the
        // plaintext differs
        match result {
            Err(AppError::Config(ConfigError::Vault(_))) => {}
            Ok(plain) => assert_ne!(plain.expose_secret(), "a much longer secret value"),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_non_base64_input() {
        assert!(vault("k", "i").decrypt("not base64 !!").is_err());
        assert!(vault("k", "i").unseal("not base64 !!").is_err());
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let v = vault("key", "iv");
        let first = v.seal("secret").unwrap();
        let second = v.seal("secret").unwrap();
        assert_ne!(first, second);
        assert_eq!(v.unseal(&first).unwrap().expose_secret(), "secret");
        assert_eq!(v.unseal(&second).unwrap().expose_secret(), "secret");
    }

    #[test]
    fn test_tampered_seal_is_rejected() {
        let v = vault("key", "iv");
        let mut bytes = STANDARD.decode(v.seal("secret").unwrap()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(v.unseal(&STANDARD.encode(bytes)).is_err());
        assert!(v.unseal(&STANDARD.encode([0u8; 4])).is_err());
    }
}
