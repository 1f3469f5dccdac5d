//! Signing-key decoding.
//!
//! Custodial keys reach the relayer in whatever format the operator exported:
//! a JSON byte array (Solana CLI keypair file), base64, or base58. Decoders are
//! tried in that order and the first one producing a valid key wins.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::SigningKey;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::domain::{AppError, BlockchainError};

/// One supported encoding of an ed25519 signing key
pub trait KeyDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, raw: &str) -> Option<SigningKey>;
}

pub struct JsonArrayDecoder;
pub struct Base64Decoder;
pub struct Base58Decoder;

impl KeyDecoder for JsonArrayDecoder {
    fn name(&self) -> &'static str {
        "json_array"
    }

    fn decode(&self, raw: &str) -> Option<SigningKey> {
        let bytes: Vec<u8> = serde_json::from_str(raw.trim()).ok()?;
        signing_key_from_bytes(&bytes)
    }
}

impl KeyDecoder for Base64Decoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn decode(&self, raw: &str) -> Option<SigningKey> {
        let bytes = STANDARD.decode(raw.trim()).ok()?;
        signing_key_from_bytes(&bytes)
    }
}

impl KeyDecoder for Base58Decoder {
    fn name(&self) -> &'static str {
        "base58"
    }

    fn decode(&self, raw: &str) -> Option<SigningKey> {
        let bytes = bs58::decode(raw.trim()).into_vec().ok()?;
        signing_key_from_bytes(&bytes)
    }
}

pub const DEFAULT_DECODERS: [&dyn KeyDecoder; 3] = [&JsonArrayDecoder, &Base64Decoder, &Base58Decoder];

/// Decode a signing key with the default decoder order
pub fn decode_signing_key(secret: &SecretString) -> Result<SigningKey, AppError> {
    decode_with(&DEFAULT_DECODERS, secret)
}

pub fn decode_with(
    decoders: &[&dyn KeyDecoder],
    secret: &SecretString,
) -> Result<SigningKey, AppError> {
    let raw = secret.expose_secret();
    for decoder in decoders {
        match decoder.decode(raw) {
            Some(key) => return Ok(key),
            None => debug!(format = decoder.name(), "Signing key not in this format"),
        }
    }
    Err(AppError::Blockchain(BlockchainError::KeyDecode(
        "private key could not be decoded in any supported format".to_string(),
    )))
}

/// Accepts a 32-byte seed or a 64-byte keypair whose public half matches.
fn signing_key_from_bytes(bytes: &[u8]) -> Option<SigningKey> {
    match bytes.len() {
        32 => {
            let seed: [u8; 32] = bytes.try_into().ok()?;
            Some(SigningKey::from_bytes(&seed))
        }
        64 => {
            let keypair: [u8; 64] = bytes.try_into().ok()?;
            SigningKey::from_keypair_bytes(&keypair).ok()
        }
        _ => None,
    }
}
